#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use wirecall::{
    Client, ErrorInfo, ErrorKind, Id, IdKind, Profile, Request, Router, Server, Settings,
    StreamTransport, msg::METHOD_NOT_FOUND,
};

#[wirecall::interface]
trait Calc {
    async fn add(&self, a: i64, b: i64) -> wirecall::Result<i64>;

    #[rpc(object_params, rename(lhs = "left"))]
    async fn sub(&self, lhs: i64, rhs: i64) -> wirecall::Result<i64>;

    async fn type_(&self) -> wirecall::Result<String>;

    async fn slow(&self, ms: u64) -> wirecall::Result<u64>;

    #[rpc(name = "calc.fail")]
    async fn fail(&self) -> wirecall::Result<()>;

    async fn div(&self, a: i64, b: i64) -> wirecall::Result<i64>;

    #[rpc(skip)]
    fn local(&self) -> &'static str {
        "local"
    }
}

struct CalcImpl;

impl Calc for CalcImpl {
    async fn add(&self, a: i64, b: i64) -> wirecall::Result<i64> {
        Ok(a + b)
    }

    async fn sub(&self, lhs: i64, rhs: i64) -> wirecall::Result<i64> {
        Ok(lhs - rhs)
    }

    async fn type_(&self) -> wirecall::Result<String> {
        Ok("calc".to_string())
    }

    async fn slow(&self, ms: u64) -> wirecall::Result<u64> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ms)
    }

    async fn fail(&self) -> wirecall::Result<()> {
        Err(wirecall::Error::remote(ErrorInfo::new(-1, "custom failure")))
    }

    async fn div(&self, a: i64, b: i64) -> wirecall::Result<i64> {
        Ok(a / b)
    }
}

type Duplex = StreamTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

fn setup(settings: Settings) -> (Server, Arc<Client<Duplex>>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut router = Router::new(settings.clone());
    Calc::register_interface(Arc::new(CalcImpl), &mut router);
    let server = Server::create(router);

    let (local, remote) = tokio::io::duplex(1 << 16);
    let (reader, writer) = tokio::io::split(remote);
    server.serve_stream(reader, writer);

    let (reader, writer) = tokio::io::split(local);
    let client = Client::over_stream(reader, writer, settings);
    (server, Arc::new(client))
}

#[tokio::test]
async fn test_proxy_calls() {
    let (server, client) = setup(Settings::default());
    let calc = CalcProxy::new(client.clone());

    assert_eq!(calc.add(2, 3).await.unwrap(), 5);
    assert_eq!(calc.sub(10, 4).await.unwrap(), 6);
    assert_eq!(calc.type_().await.unwrap(), "calc");
    assert_eq!(calc.local(), "local");
    assert_eq!(client.pending(), 0);

    let router = server.router();
    assert!(router.contains("type"));
    assert!(router.contains("calc.fail"));
    assert!(!router.contains("local"));
    assert_eq!(<CalcImpl as Calc>::NAME, "Calc");
    assert_eq!(<CalcImpl as Calc>::METHODS.len(), 6);

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_panicking_method_replies_with_error() {
    let (server, client) = setup(Settings::default());

    let rsp = client
        .send_request_and_wait(Request::new("div", Some(json!([1, 0]))), None)
        .await
        .unwrap();
    let err = rsp.error.unwrap();
    assert_eq!(err.code, wirecall::msg::INTERNAL_ERROR);
    assert!(err.message.contains("divide by zero"));

    // the connection keeps serving after the panic.
    let calc = CalcProxy::new(client.clone());
    assert_eq!(calc.div(9, 3).await.unwrap(), 3);
    let err = calc.div(1, 0).await.unwrap_err();
    assert_eq!(err.remote_info().unwrap().code, wirecall::msg::INTERNAL_ERROR);

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_named_params_on_the_wire() {
    let (_server, client) = setup(Settings::default());

    let rsp = client
        .send_request_and_wait(Request::new("sub", Some(json!({"left": 9, "rhs": 2}))), None)
        .await
        .unwrap();
    assert_eq!(rsp.result, Some(json!(7)));

    // positional params are accepted as well.
    let rsp = client
        .send_request_and_wait(Request::new("sub", Some(json!([9, 2]))), None)
        .await
        .unwrap();
    assert_eq!(rsp.result, Some(json!(7)));

    let rsp = client
        .send_request_and_wait(Request::new("add", Some(json!(["x", 1]))), None)
        .await
        .unwrap();
    assert_eq!(rsp.error.unwrap().code, wirecall::msg::INVALID_PARAMS);
}

#[tokio::test]
async fn test_remote_and_unknown_method_errors() {
    let (_server, client) = setup(Settings::default());
    let calc = CalcProxy::new(client.clone());

    let err = calc.fail().await.unwrap_err();
    assert_eq!(err.remote_info(), Some(&ErrorInfo::new(-1, "custom failure")));

    let rsp = client
        .send_request_and_wait(Request::new("nope", None), None)
        .await
        .unwrap();
    let error = rsp.error.unwrap();
    assert_eq!(error.code, METHOD_NOT_FOUND);
    assert!(error.message.contains("nope"));
}

#[tokio::test]
async fn test_timeout_then_late_response_is_dropped() {
    let settings = Settings {
        response_timeout: Duration::from_millis(100),
        ..Settings::default()
    };
    let (_server, client) = setup(settings);
    let calc = CalcProxy::new(client.clone());

    let err = calc.slow(300).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(client.pending(), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(calc.add(1, 2).await.unwrap(), 3);
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_concurrent_calls() {
    let (_server, client) = setup(Settings::default());
    let calc = CalcProxy::new(client.clone());

    let (a, b, c) = tokio::join!(calc.slow(50), calc.add(1, 2), calc.slow(10));
    assert_eq!(a.unwrap(), 50);
    assert_eq!(b.unwrap(), 3);
    assert_eq!(c.unwrap(), 10);
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_lexical_ids() {
    let settings = Settings {
        id_kind: IdKind::Lexical,
        ..Settings::default()
    };
    let (_server, client) = setup(settings);
    let calc = CalcProxy::new(client.clone());

    assert_eq!(calc.add(1, 1).await.unwrap(), 2);
    let rsp = client
        .send_request_and_wait(Request::new("add", Some(json!([2, 2]))), None)
        .await
        .unwrap();
    assert_eq!(rsp.id, Id::from("1"));
    assert_eq!(rsp.result, Some(json!(4)));
}

#[tokio::test]
async fn test_minimal_profile() {
    let settings = Settings {
        profile: Profile::Minimal,
        strip_trailing_underscore: false,
        ..Settings::default()
    };
    let (server, client) = setup(settings);
    let calc = CalcProxy::new(client);

    assert!(server.router().contains("type_"));
    assert_eq!(calc.type_().await.unwrap(), "calc");
    assert_eq!(calc.add(20, 22).await.unwrap(), 42);
}
