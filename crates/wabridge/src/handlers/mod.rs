//! HTTP request handlers.

pub mod api_auth;
mod health;
mod instance;
mod messages;
pub(crate) mod problem_details;
mod webhook;

pub use health::{health, qr_page, root};
pub use instance::{connect, get_named, get_qr, get_status};
pub use messages::{get_media, get_media_base64, send_text, send_text_for_instance};
pub use webhook::{get_webhook, set_webhook};
