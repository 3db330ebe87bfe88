pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod messaging;
pub mod mutations;
pub mod notifications;
pub mod presence;
pub mod seen;
pub mod session;
pub mod state;
pub mod subscriptions;
pub mod view;

use tracing_subscriber::{fmt, EnvFilter};

pub use client::{ChatClient, Intent};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::ClientEvent;
pub use media::{MediaError, MediaUpload, MediaUploader, MemoryUploader};
pub use messaging::{GroupUpdate, OutgoingMessage, ProfileUpdate};
pub use mutations::{ContactSettingsUpdate, ThemeUpdate};
pub use session::{AuthUser, SessionContext};
pub use view::{ConversationView, SidebarView};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter. Calling it again is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("murmur_client=debug,murmur_store=info,warn"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();
    if installed {
        tracing::info!("Starting Murmur sync engine v{}", env!("CARGO_PKG_VERSION"));
    }
}
