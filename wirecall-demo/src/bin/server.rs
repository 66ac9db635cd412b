use clap::Parser;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use wirecall::{Error, ErrorKind, Profile, Result, Router, Server, Settings};
use wirecall_demo::{Calculator, Echo, Point, TransportKind};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "127.0.0.1:8000")]
    pub addr: std::net::SocketAddr,

    /// Transport to serve.
    #[arg(long, default_value = "socket")]
    pub transport: TransportKind,

    /// Wire profile.
    #[arg(long, default_value = "standard")]
    pub profile: Profile,
}

#[derive(Default)]
struct DemoImpl {
    greeted: AtomicU64,
}

impl Calculator for DemoImpl {
    async fn add(&self, a: i64, b: i64) -> Result<i64> {
        a.checked_add(b)
            .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, format!("{a} + {b} overflows")))
    }

    async fn sub(&self, lhs: i64, rhs: i64) -> Result<i64> {
        lhs.checked_sub(rhs)
            .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, format!("{lhs} - {rhs} overflows")))
    }

    async fn type_(&self) -> Result<String> {
        Ok("calculator".to_string())
    }

    async fn midpoint(&self, a: Point, b: Point) -> Result<Point> {
        Ok(Point {
            x: (a.x + b.x) / 2,
            y: (a.y + b.y) / 2,
        })
    }
}

impl Echo for DemoImpl {
    async fn echo(&self, value: String) -> Result<String> {
        Ok(value)
    }

    async fn greet(&self, name: String) -> Result<String> {
        let val = self.greeted.fetch_add(1, Ordering::AcqRel);
        Ok(format!("hello {name}({val})!"))
    }
}

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout may carry frames.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let settings = Settings {
        profile: args.profile,
        ..Settings::default()
    };
    let demo = Arc::new(DemoImpl::default());
    let mut router = Router::new(settings);
    Calculator::register_interface(demo.clone(), &mut router);
    Echo::register_interface(demo, &mut router);
    let server = Server::create(router);

    let methods: Vec<&String> = server.router().method_names().collect();
    match args.transport {
        TransportKind::Socket => {
            let addr = server.listen_socket(args.addr).await?;
            tracing::info!("serving {methods:?} over tcp on {addr}...");
        }
        TransportKind::Http => {
            let addr = server.listen_http(args.addr).await?;
            tracing::info!("serving {methods:?} over http on {addr}...");
        }
        TransportKind::Stdio => {
            server.serve_stream(tokio::io::stdin(), tokio::io::stdout());
            tracing::info!("serving {methods:?} over stdio...");
        }
    }

    server.join().await;
    Ok(())
}
