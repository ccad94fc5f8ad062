//! Connection manager
//!
//! Brings the server connection up from a host thread and tears it down.

use tracing::{debug, info};

use crate::constants::{APPLICATION_ID, APPLICATION_NAME, ICON_NAME};
use crate::error::ConnectionError;
use crate::output::session::Session;
use crate::server::{ContextState, Mainloop, Proplist};

/// Properties identifying us to the server
pub(crate) fn application_props() -> Proplist {
    let mut props = Proplist::new();
    props.set(Proplist::APPLICATION_NAME, APPLICATION_NAME);
    props.set(Proplist::APPLICATION_ID, APPLICATION_ID);
    props.set(Proplist::APPLICATION_ICON_NAME, ICON_NAME);
    props
}

impl Session {
    /// Drop the stream and the connection, if any
    pub(crate) fn disconnect(&mut self) {
        self.release_stream();
        if let Some(context) = self.context.take() {
            debug!(?context, "disconnecting");
            self.backend.disconnect_context(context);
        }
        self.context_state = ContextState::Unconnected;
    }
}

/// Connect to the configured server and block until the connection is
/// ready or has failed. Any previous connection is torn down first.
pub(crate) fn connect(mainloop: &Mainloop<Session>) -> Result<(), ConnectionError> {
    let mut session = mainloop.lock();
    session.disconnect();

    let server = session.config.server_addr().map(str::to_string);
    let context = session
        .backend
        .connect_context(server.as_deref(), &application_props())
        .map_err(ConnectionError::Unreachable)?;
    session.context = Some(context);
    session.context_state = ContextState::Connecting;

    loop {
        match session.context_state {
            ContextState::Ready => break,
            state if !state.is_good() => {
                let reason = session.backend.last_error();
                session.disconnect();
                return Err(ConnectionError::Unreachable(reason));
            }
            _ => mainloop.wait(&mut session),
        }
    }

    info!(server = server.as_deref().unwrap_or("default"), "connected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_props() {
        let props = application_props();
        assert_eq!(props.get(Proplist::APPLICATION_NAME), Some("Pulse Output"));
        assert_eq!(props.get(Proplist::APPLICATION_ICON_NAME), Some(ICON_NAME));
        assert_eq!(props.len(), 3);
    }
}
