use tracing::{error, info, warn};

use crate::api::{Placement, PlacementApi, Relogin, Session};
use crate::error::EngineResult;

const MAX_FAILURE_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Placed { retried: bool },
    /// Non-auth failure. The batch is dropped for this pass.
    Rejected { status: u16, body: String },
    /// Auth expired and could not be restored; the session token is cleared.
    AuthLost { status: u16, body: String },
}

/// Submits one batch. On an auth-expired response the session is refreshed
/// through `relogin` and the identical batch is sent exactly once more.
pub fn submit_batch(
    api: &dyn PlacementApi,
    relogin: &dyn Relogin,
    session: &mut Session,
    batch: &[Placement],
) -> EngineResult<SubmitOutcome> {
    let response = api.place(session, batch)?;
    if response.is_success() {
        info!("placed {} pixels", batch.len());
        return Ok(SubmitOutcome::Placed { retried: false });
    }

    let body = truncate_text(&response.body, MAX_FAILURE_BODY_CHARS);
    warn!(status = response.status, "placement failed: {body}");
    if !response.is_auth_expired() {
        return Ok(SubmitOutcome::Rejected {
            status: response.status,
            body,
        });
    }

    session.token.clear();
    let refreshed = match relogin.relogin() {
        Ok(Some(fresh)) if fresh.is_active() => fresh,
        Ok(_) => {
            info!("relogin produced no session");
            return Ok(SubmitOutcome::AuthLost {
                status: response.status,
                body,
            });
        }
        Err(err) => {
            error!("relogin failed: {err}");
            return Ok(SubmitOutcome::AuthLost {
                status: response.status,
                body,
            });
        }
    };
    info!("relogin succeeded");
    *session = refreshed;

    let retry = api.place(session, batch)?;
    if retry.is_success() {
        info!("placed {} pixels after relogin", batch.len());
        return Ok(SubmitOutcome::Placed { retried: true });
    }
    let body = truncate_text(&retry.body, MAX_FAILURE_BODY_CHARS);
    warn!(status = retry.status, "retry after relogin failed: {body}");
    session.token.clear();
    Ok(SubmitOutcome::AuthLost {
        status: retry.status,
        body,
    })
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
