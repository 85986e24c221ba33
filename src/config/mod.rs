mod settings;

pub use settings::{
    BrokerConfig, DatabaseConfig, LogConfig, Settings, SmtpConfig, TemplateConfig, WorkerConfig,
};
