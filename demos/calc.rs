use jsonrpc_dispatch::{Client, Dispatcher, Methods, Registry, Server, Service};
use std::time::Duration;
use tokio::task;

pub struct Calc;

impl Calc {
    fn add(&self, a: i64, b: i64) -> Result<i64, String> {
        a.checked_add(b).ok_or_else(|| "overflow".to_owned())
    }
}

impl Service for Calc {
    fn methods(methods: &mut Methods<Self>) {
        methods.add("Add", Calc::add);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut registry = Registry::builder();
    registry.register("calc", Calc).unwrap();
    let registry = registry.build();
    for method in registry.methods() {
        println!("{} {:?} -> {:?}", method.name, method.params, method.outputs);
    }

    let server = Server::new(Dispatcher::new(registry));
    task::spawn(server.serve_tcp(8888));
    tokio::time::sleep(Duration::from_secs_f32(0.01)).await;

    let mut client = Client::connect("127.0.0.1:8888").await.unwrap();
    let sum: i64 = client.call("calc.Add", (2, 3)).await.unwrap();
    println!("2 + 3 = {sum}");
    println!("{}", client.call::<_, i64>("calc.Add", (i64::MAX, 1)).await.unwrap_err());
}
