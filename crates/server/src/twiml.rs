//! Provider markup replies, rendered from autoescaped XML templates.

use tera::{Context, Tera};

use dialgate_core::config::TelephonyConfig;
use dialgate_core::domain::call::CallSession;

const CONNECT_TEMPLATE: &str = "twiml/connect.xml";
const DECLINE_TEMPLATE: &str = "twiml/decline.xml";
const ACK_TEMPLATE: &str = "twiml/ack.xml";

/// Fallback for the status path, which must answer 200 even if rendering breaks.
pub const EMPTY_RESPONSE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response></Response>\n";

pub struct TwimlRenderer {
    tera: Tera,
    greeting: String,
    decline_message: String,
    media_stream_url: String,
}

impl TwimlRenderer {
    pub fn new(telephony: &TelephonyConfig) -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (CONNECT_TEMPLATE, include_str!("../../../templates/twiml/connect.xml")),
            (DECLINE_TEMPLATE, include_str!("../../../templates/twiml/decline.xml")),
            (ACK_TEMPLATE, include_str!("../../../templates/twiml/ack.xml")),
        ])?;

        Ok(Self {
            tera,
            greeting: telephony.greeting.trim().to_string(),
            decline_message: telephony.decline_message.trim().to_string(),
            media_stream_url: telephony.media_stream_url.trim().to_string(),
        })
    }

    /// Greeting followed by the instruction to bridge audio to the media stream.
    pub fn connect(&self, session: &CallSession) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("greeting", &self.greeting);
        context.insert("stream_url", &self.media_stream_url);
        context.insert("agent_id", &session.agent_id.0);
        context.insert("call_sid", &session.call_sid.0);
        self.tera.render(CONNECT_TEMPLATE, &context)
    }

    pub fn decline(&self) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("message", &self.decline_message);
        self.tera.render(DECLINE_TEMPLATE, &context)
    }

    pub fn ack(&self) -> Result<String, tera::Error> {
        self.tera.render(ACK_TEMPLATE, &Context::new())
    }
}
