mod schema;

pub use schema::{
    AppearanceConfig, CompletionConfig, Config, ExperimentalConfig, GatewayConfig, MailConfig,
    RelayConfig, StoreConfig,
};
