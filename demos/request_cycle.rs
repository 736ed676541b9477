//! Request cycle example for hybrid-session-store
//!
//! Simulates two requests from the same client against an in-memory SQLite
//! database: the first creates a session and stores a value, the second
//! presents the issued session id and reads the value back. A third request
//! from a different address shows the fingerprint check rejecting the id.
//!
//! # Running the example
//!
//! ```bash
//! cargo run --example request_cycle
//! ```

use std::sync::Arc;

use hybrid_session_store::{
    migration::Migrator, RequestContext, SessionConfig, SessionManager, SessionStore,
    SessionTransport,
};
use sea_orm_migration::MigratorTrait;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Stand-in for the host framework's request context.
struct Request {
    ip: String,
    user_agent: String,
}

impl RequestContext for Request {
    fn client_address(&self) -> &str {
        &self.ip
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

/// Stand-in for the host framework's cookie layer.
#[derive(Default)]
struct Cookie {
    id: Option<String>,
}

impl SessionTransport for Cookie {
    fn current_session_id(&self) -> Option<String> {
        self.id.clone()
    }

    fn issue_session_id(&mut self, id: &str) {
        self.id = Some(id.to_string());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .init();

    let conn = sea_orm::Database::connect("sqlite::memory:").await?;
    Migrator::up(&conn, None).await?;

    let config = Arc::new(SessionConfig::default().with_expiration(3600));
    let store = SessionStore::open(conn, &config).await?;

    // Request 1: no cookie yet, a session is created
    let request = Request {
        ip: "203.0.113.7".into(),
        user_agent: "Mozilla/5.0 (demo)".into(),
    };
    let mut session = SessionManager::new(store.clone(), config.clone(), &request, Cookie::default());
    if !session.sess_read().await? {
        info!("no valid session, creating one");
        session.sess_create();
    }
    session
        .data_mut()
        .expect("session is active")
        .insert("user".into(), serde_json::json!("alice"));
    session.sess_write().await?;

    let issued = session.session_id().expect("session is active").to_string();
    info!(session_id = %issued, "request 1 done, cookie issued");

    // Request 2: same client presents the cookie
    let mut session = SessionManager::new(
        store.clone(),
        config.clone(),
        &request,
        Cookie { id: Some(issued.clone()) },
    );
    assert!(session.sess_read().await?);
    info!(user = %session.data().unwrap()["user"], "request 2 validated the session");
    session.sess_write().await?;

    // Request 3: same cookie from a different address is rejected
    let hijacker = Request {
        ip: "198.51.100.99".into(),
        user_agent: "Mozilla/5.0 (demo)".into(),
    };
    let mut session = SessionManager::new(
        store,
        config,
        &hijacker,
        Cookie { id: Some(issued) },
    );
    assert!(!session.sess_read().await?);
    info!("request 3 rejected: fingerprint mismatch degrades to a new session");

    Ok(())
}
