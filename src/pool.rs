//! The upstream connection pool (C5, §4.5): up to K idle sockets per
//! route, checked in and out by pool key.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::io::Interest;
use tokio::net::TcpStream;

const DEFAULT_CAPACITY: usize = 5;

/// Keeps up to `capacity` idle upstream sockets per route key.
pub struct Pool {
    capacity: usize,
    idle: Mutex<HashMap<String, VecDeque<TcpStream>>>,
}

impl Pool {
    pub fn new(capacity: usize) -> Pool {
        Pool {
            capacity,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Pops the next idle channel for `key`, skipping (and dropping) any
    /// that turn out to already be closed by the peer — an idle pooled
    /// channel is never handed out dead (§4.5, §8 invariants).
    pub async fn check_out(&self, key: &str) -> Option<TcpStream> {
        loop {
            let candidate = self.idle.lock().unwrap().get_mut(key).and_then(VecDeque::pop_front);
            let stream = candidate?;
            if Self::is_alive(&stream).await {
                return Some(stream);
            }
            // else: peer closed while idle; drop and try the next one.
        }
    }

    /// Returns `stream` to the pool for `key` if there is room, otherwise
    /// closes it by dropping it (§4.5).
    pub fn check_in(&self, key: String, stream: TcpStream) {
        let mut idle = self.idle.lock().unwrap();
        let queue = idle.entry(key).or_default();
        if queue.len() < self.capacity {
            queue.push_back(stream);
        }
    }

    async fn is_alive(stream: &TcpStream) -> bool {
        match stream.ready(Interest::READABLE).await {
            Ok(ready) if ready.is_readable() => {
                let mut probe = [0u8; 1];
                match stream.try_read(&mut probe) {
                    Ok(0) => false,
                    Ok(_) => false, // unsolicited bytes on an idle channel: treat as dead
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
                    Err(_) => false,
                }
            }
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

impl Default for Pool {
    fn default() -> Pool {
        Pool::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn check_in_then_out_round_trips_a_connected_pair() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        drop(server);

        let pool = Pool::new(2);
        pool.check_in("r".into(), client);
        // The peer (server) dropped immediately, so the idle channel is
        // observed as closed and check_out yields nothing.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(pool.check_out("r").await.is_none());
    }

    #[tokio::test]
    async fn check_in_respects_capacity() {
        let pool = Pool::new(1);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let a = TcpStream::connect(addr).await.unwrap();
        let (_sa, _) = listener.accept().await.unwrap();
        let b = TcpStream::connect(addr).await.unwrap();
        let (_sb, _) = listener.accept().await.unwrap();

        pool.check_in("r".into(), a);
        pool.check_in("r".into(), b); // over capacity, dropped
        assert_eq!(pool.idle.lock().unwrap().get("r").unwrap().len(), 1);
    }
}
