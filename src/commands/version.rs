pub fn run() {
    println!("kube-sweep {}", env!("CARGO_PKG_VERSION"));
}
