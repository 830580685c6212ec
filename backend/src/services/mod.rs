// Outbound delivery used by the SEND_EMAIL and WEBHOOK actions

pub mod email;
pub mod webhook;

pub use email::{MailError, Mailer, OutgoingEmail, SmtpMailer};
pub use webhook::{HttpWebhookSender, WebhookError, WebhookRequest, WebhookSender};
