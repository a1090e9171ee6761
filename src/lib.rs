#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod column;
mod config;
mod connection;
mod row;
mod session;
mod split;
mod statement;
mod table;
mod task;

pub mod error;
pub mod large_object;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod reader;
pub mod types;

pub use self::{
    column::Column,
    config::{Config, SslMode},
    connection::Reservation,
    error::Error,
    large_object::{LargeObject, LoMode, LoWhence},
    pool::{ConnectionPool, PoolOptions},
    queue::{EventQueue, Outcome, Strand},
    reader::Reader,
    row::{Row, RowIndex},
    session::Session,
    split::split_queries,
    statement::PreparedStatement,
    table::Table,
};
