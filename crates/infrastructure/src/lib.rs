pub mod amqp_broker;
pub mod broker_factory;
pub mod memory_broker;
pub mod redis_broker;
pub mod result_backend;
pub mod sqlite_broker;

pub use amqp_broker::AmqpBroker;
pub use broker_factory::{redact_url, BrokerFactory, BrokerKind};
pub use memory_broker::{InMemoryBroker, InMemoryDocumentBroker};
pub use redis_broker::RedisListBroker;
pub use result_backend::{create_result_backend, MemoryResultBackend, RedisResultBackend};
pub use sqlite_broker::SqliteDocumentBroker;
