use jsonrpc_dispatch::{
    CallContext, Client, ClientError, Dispatcher, Fallible, Json, Methods, Registry, Server,
    Service,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{net::TcpListener, task, time};

#[derive(Debug)]
struct DivideByZero;

impl fmt::Display for DivideByZero {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("division by zero")
    }
}

#[derive(Default)]
struct Calc {
    memory: AtomicI64,
}

impl Calc {
    fn add(&self, a: i64, b: i64) -> Result<i64, DivideByZero> {
        Ok(a + b)
    }

    fn div(&self, a: i64, b: i64) -> Result<i64, DivideByZero> {
        if b == 0 {
            return Err(DivideByZero);
        }
        Ok(a / b)
    }

    fn store(&self, value: i64) {
        self.memory.store(value, Ordering::SeqCst);
    }

    fn recall(&self) -> Json<i64> {
        Json(self.memory.load(Ordering::SeqCst))
    }

    fn check(&self, ctx: &CallContext, value: i64) -> Fallible<String> {
        if ctx.is_cancelled() {
            return Fallible(Err("cancelled".into()));
        }
        Fallible(if value >= 0 {
            Ok(())
        } else {
            Err(format!("{value} is negative"))
        })
    }
}

impl Service for Calc {
    fn methods(methods: &mut Methods<Self>) {
        methods
            .add("Add", Calc::add)
            .add("Div", Calc::div)
            .add("Store", Calc::store)
            .add("Recall", Calc::recall)
            .add_with_context("Check", Calc::check);
    }
}

async fn start() -> Client {
    let mut builder = Registry::builder();
    builder.register("calc", Calc::default()).unwrap();
    let server = Server::new(Dispatcher::new(builder.build()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    task::spawn(server.serve(listener));

    Client::connect(addr).await.unwrap()
}

#[tokio::test]
async fn add_round_trip() {
    let mut client = start().await;
    let sum: i64 = client.call("calc.Add", (2, 3)).await.unwrap();
    assert_eq!(sum, 5);

    for _ in 0..16 {
        let a = rand::random::<i32>() as i64;
        let b = rand::random::<i32>() as i64;
        let sum: i64 = client.call("calc.Add", (a, b)).await.unwrap();
        assert_eq!(sum, a + b);
    }
}

#[tokio::test]
async fn handler_error_reaches_client() {
    let mut client = start().await;
    let err = client.call::<_, i64>("calc.Div", (1, 0)).await.unwrap_err();
    match err {
        ClientError::Rpc(err) => {
            assert_eq!(err.code, 1);
            assert_eq!(err.message, "division by zero");
        }
        other => panic!("unexpected error: {other}"),
    }

    let quotient: i64 = client.call("calc.Div", (9, 3)).await.unwrap();
    assert_eq!(quotient, 3);
}

#[tokio::test]
async fn notifications_are_not_answered() {
    let mut client = start().await;
    client.notify("calc.Store", (42,)).await.unwrap();
    client.notify("calc.Div", (1, 0)).await.unwrap();
    client.notify("calc.Nope", ()).await.unwrap();

    // The next reply on the connection belongs to this call.
    let recalled: i64 = client.call("calc.Recall", ()).await.unwrap();
    assert_eq!(recalled, 42);
}

#[tokio::test]
async fn context_operations_count_only_wire_params() {
    let mut client = start().await;
    client.call::<_, ()>("calc.Check", (1,)).await.unwrap();

    let err = client.call::<_, ()>("calc.Check", (-1,)).await.unwrap_err();
    assert_eq!(err.to_string(), "RPC client error: -1 is negative (code 1)");

    let err = client.call::<_, ()>("calc.Check", ()).await.unwrap_err();
    assert!(matches!(err, ClientError::Rpc(err) if err.code == -32602));
}

#[tokio::test]
async fn unknown_method() {
    let mut client = start().await;
    let err = client.call::<_, i64>("calc.Mul", (2, 3)).await.unwrap_err();
    assert!(matches!(err, ClientError::Rpc(err) if err.code == -32601));
}

#[tokio::test]
async fn cancel_stops_the_server() {
    let mut builder = Registry::builder();
    builder.register("calc", Calc::default()).unwrap();
    let server = Server::new(Dispatcher::new(builder.build()));
    let token = server.cancel_token();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let serving = task::spawn(server.serve(listener));
    token.cancel();
    serving.await.unwrap().unwrap();
}

#[derive(Default)]
struct Watcher {
    released: AtomicBool,
}

impl Watcher {
    /// Blocks until its call is cancelled, giving up after five seconds.
    fn wait(&self, ctx: &CallContext) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ctx.is_cancelled() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        self.released.store(ctx.is_cancelled(), Ordering::SeqCst);
    }
}

impl Service for Watcher {
    fn methods(methods: &mut Methods<Self>) {
        methods.add_with_context("Wait", Watcher::wait);
    }
}

#[tokio::test]
async fn disconnect_cancels_running_calls() {
    let watcher = Arc::new(Watcher::default());
    let mut builder = Registry::builder();
    builder.register_shared("watch", watcher.clone()).unwrap();
    let server = Server::new(Dispatcher::new(builder.build()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    task::spawn(server.serve(listener));

    let mut client = Client::connect(addr).await.unwrap();
    client.notify("watch.Wait", ()).await.unwrap();
    drop(client);

    for _ in 0..500 {
        if watcher.released.load(Ordering::SeqCst) {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!("call never observed the disconnect");
}
