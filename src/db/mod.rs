mod connection;
mod datasource;
mod query;
mod value;

pub use connection::*;
pub use datasource::*;
pub use query::*;
pub use value::*;

#[cfg(test)]
pub(crate) use datasource::stub;
