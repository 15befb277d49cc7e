//! Route module decomposition: one file per §6 endpoint group, following the
//! teacher's per-domain split (`rooms.rs`, `dm.rs`, `stream.rs`, `system.rs`).

mod agents;
mod chat;
mod contacts;
mod conversations;
mod init;
mod mail;
mod reservations;
mod system;

pub use agents::{
    deregister_peer, deregister_self, get_log, heartbeat, list_agents, patch_agent, resolve_agent,
    retire_agent, rotate_agent, suggest_alias,
};
pub use chat::{
    create_or_send_session, list_sessions, mark_read, pending, send_session_message, session_history,
    session_stream,
};
pub use contacts::{add_contact, list_contacts, remove_contact};
pub use conversations::list_conversations;
pub use init::init;
pub use mail::{acknowledge, inbox, send_mail};
pub use reservations::{acquire_reservation, list_reservations, release_reservation, renew_reservation, revoke_reservations};
pub use system::{health, introspect, not_found, projects_current, stats, too_many_requests};
