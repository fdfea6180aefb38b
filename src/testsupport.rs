//! Helpers shared by the unit test modules.

use std::net::TcpListener;
use std::thread;

/// Bind a local listener that accepts connections and holds them open
/// without ever writing a reply, imitating a stalled Redis node. Returns
/// the bound port; the accept loop runs until the test binary exits.
pub(crate) fn silent_server() -> u16 {
	let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
	let port = listener.local_addr().expect("listener local addr").port();
	thread::spawn(move || {
		let mut held = Vec::new();
		while let Ok((socket, _)) = listener.accept() {
			held.push(socket);
		}
	});
	port
}
