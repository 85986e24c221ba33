mod service;
mod transport;

pub use service::{EmailError, EmailResult, EmailService};
pub use transport::{MailTransport, OutgoingEmail, SmtpMailTransport, TransportError};
