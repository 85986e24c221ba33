mod types;

pub use types::{
    Channel, EmailTemplate, Event, Notification, NotificationStatus, Preference, UnknownChannel,
};
