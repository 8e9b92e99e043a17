use axum::Router;

use dialgate_db::DbPool;

use crate::state::AppState;
use crate::{agents, health, ingest, telephony};

pub fn router(state: AppState, db_pool: DbPool) -> Router {
    Router::new()
        .merge(telephony::router(state.clone()))
        .merge(ingest::router(state.clone()))
        .merge(agents::router(state))
        .merge(health::router(db_pool))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use dialgate_db::{connect_with_settings, migrations};

    use crate::state::AppState;
    use crate::testing::{body_json, test_config};

    #[tokio::test]
    async fn merged_router_serves_health_and_guards_webhooks() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let state = AppState::from_pool(&test_config(), pool.clone()).expect("state");
        let app = super::router(state, pool.clone());

        let health = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let unsigned = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/voice")
                    .header("host", "voice.example.com")
                    .body(Body::from("CallSid=CA1"))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(body_json(health).await["database"]["status"], "ready");
        assert_eq!(unsigned.status(), StatusCode::FORBIDDEN);
        pool.close().await;
    }
}
