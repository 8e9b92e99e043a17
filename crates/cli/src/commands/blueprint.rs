use dialgate_core::blueprint::{generate, BlueprintRequest, WorkflowConfig};

use crate::commands::CommandResult;

#[derive(Clone, Debug)]
pub struct BlueprintArgs {
    pub url: String,
    pub secret: String,
    pub name: String,
    pub workflow_name: Option<String>,
    pub active: bool,
}

/// Prints the importable document itself on success so it can be piped into a file.
pub fn run(args: BlueprintArgs) -> CommandResult {
    let mut request = BlueprintRequest::new(args.url, args.secret, args.name);
    if args.workflow_name.is_some() || args.active {
        request.workflow = Some(WorkflowConfig {
            workflow_name: args.workflow_name,
            webhook_path: None,
            active: args.active,
        });
    }

    let document = match generate(&request) {
        Ok(document) => document,
        Err(error) => {
            return CommandResult::failure("blueprint", "validation", error.to_string(), 2);
        }
    };

    match document.to_pretty_json() {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("blueprint", "serialization", error.to_string(), 3),
    }
}
