use clap::Parser;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use wirecall::{Client, IdKind, Profile, Result, Settings, Transport};
use wirecall_demo::{Calculator, CalculatorProxy, Echo, EchoProxy, Point, TransportKind};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:8000")]
    pub addr: String,

    /// Transport to use.
    #[arg(long, default_value = "socket")]
    pub transport: TransportKind,

    /// Wire profile.
    #[arg(long, default_value = "standard")]
    pub profile: Profile,

    /// Request id kind.
    #[arg(long, default_value = "numeric")]
    pub id_kind: IdKind,

    /// Response timeout in milliseconds.
    #[arg(long, default_value = "500")]
    pub timeout_ms: u64,

    /// Name sent to `echo.greet`.
    #[arg(short, long, default_value = "alice")]
    pub value: String,

    /// Enable stress testing.
    #[arg(long, default_value_t = false)]
    pub stress: bool,

    /// Stress testing duration.
    #[arg(long, default_value = "60")]
    pub secs: u64,

    /// The number of coroutines.
    #[arg(long, default_value = "32")]
    pub coroutines: usize,
}

#[derive(Default)]
struct State {
    total: AtomicUsize,
    fails: AtomicUsize,
}

async fn stress_test<T: Transport>(client: Arc<Client<T>>, args: Args) {
    let state = Arc::new(State::default());
    let start_time = std::time::Instant::now();
    let secs = args.secs;
    let mut tasks = vec![];
    for i in 0..args.coroutines {
        let calc = CalculatorProxy::new(client.clone());
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            let i = i64::try_from(i).unwrap_or_default();
            while start_time.elapsed().as_secs() < secs {
                for j in 0..256 {
                    let result = calc.add(i, j).await;
                    state.total.fetch_add(1, Ordering::AcqRel);
                    if result.is_err() {
                        state.fails.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }));
    }
    tokio::select! {
        _ = async {
            for task in tasks {
                let _ = task.await;
            }
        } => {
        }
        _ = async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let total = state.total.swap(0, Ordering::AcqRel);
                let fails = state.fails.swap(0, Ordering::AcqRel);
                tracing::info!("QPS: {total}/s, fails: {fails}/s");
            }
        } => {
        }
    }
}

async fn run<T: Transport>(client: Arc<Client<T>>, args: Args) {
    if args.stress {
        stress_test(client, args).await;
        return;
    }

    let calc = CalculatorProxy::new(client.clone());
    tracing::info!("{}", calc.describe());
    tracing::info!("add rsp: {:?}", calc.add(2, 3).await);
    tracing::info!("sub rsp: {:?}", calc.sub(7, 4).await);
    tracing::info!("type rsp: {:?}", calc.type_().await);
    let rsp = calc
        .midpoint(Point { x: 0, y: 0 }, Point { x: 4, y: 10 })
        .await;
    tracing::info!("midpoint rsp: {:?}", rsp);

    let echo = EchoProxy::new(client);
    tracing::info!("echo rsp: {:?}", echo.echo(args.value.clone()).await);
    tracing::info!("greet rsp: {:?}", echo.greet(args.value.clone()).await);
}

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = Settings {
        profile: args.profile,
        id_kind: args.id_kind,
        response_timeout: Duration::from_millis(args.timeout_ms),
        ..Settings::default()
    };

    match args.transport {
        TransportKind::Socket => {
            let client = Client::over_socket(args.addr.clone(), settings);
            client.connect().await?;
            run(Arc::new(client), args).await;
        }
        TransportKind::Http => {
            let client = Client::over_http(&format!("http://{}/", args.addr), settings)?;
            run(Arc::new(client), args).await;
        }
        TransportKind::Stdio => {
            let client = Client::over_stream(tokio::io::stdin(), tokio::io::stdout(), settings);
            run(Arc::new(client), args).await;
        }
    }
    Ok(())
}
