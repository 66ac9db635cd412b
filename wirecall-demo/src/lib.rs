use serde::{Deserialize, Serialize};
use wirecall::Result;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

#[wirecall::interface]
pub trait Calculator {
    async fn add(&self, a: i64, b: i64) -> Result<i64>;

    #[rpc(object_params, rename(lhs = "left", rhs = "right"))]
    async fn sub(&self, lhs: i64, rhs: i64) -> Result<i64>;

    /// Served as `type`.
    async fn type_(&self) -> Result<String>;

    async fn midpoint(&self, a: Point, b: Point) -> Result<Point>;

    #[rpc(skip)]
    fn describe(&self) -> String {
        format!("{} over JSON-RPC", Self::NAME)
    }
}

#[wirecall::interface]
pub trait Echo {
    async fn echo(&self, value: String) -> Result<String>;

    #[rpc(name = "echo.greet")]
    async fn greet(&self, name: String) -> Result<String>;
}

/// How the demo binaries talk to each other.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Line-framed TCP.
    Socket,
    /// One POST per message.
    Http,
    /// Line-framed stdin/stdout.
    Stdio,
}
