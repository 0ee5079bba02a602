//! Fire-and-forget DogStatsD client.
//!
//! Encodes `name:value|type|#tag,...` datagrams onto a connected UDP socket.
//! Send failures are ignored; a mirror that drops samples is preferable to a
//! pipeline that blocks on its stats sink.

use std::net::UdpSocket;

use crate::error::{ExporterError, Result};

pub struct StatsdClient {
    socket: UdpSocket,
}

impl StatsdClient {
    /// Connect to the agent. Resolution or bind failure is an error; callers
    /// treat a configured-but-unreachable sink as fatal at startup.
    pub fn connect(address: &str) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(address).map_err(|e| {
            ExporterError::Config(format!("cannot reach statsd at '{}': {}", address, e))
        })?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    pub fn incr(&self, name: &str, tags: &[String]) {
        self.send(&encode(name, "1", "c", tags));
    }

    pub fn count(&self, name: &str, value: i64, tags: &[String]) {
        self.send(&encode(name, &value.to_string(), "c", tags));
    }

    pub fn histogram(&self, name: &str, value: f64, tags: &[String]) {
        self.send(&encode(name, &value.to_string(), "h", tags));
    }

    pub fn gauge(&self, name: &str, value: f64, tags: &[String]) {
        self.send(&encode(name, &value.to_string(), "g", tags));
    }

    fn send(&self, payload: &str) {
        let _ = self.socket.send(payload.as_bytes());
    }
}

fn encode(name: &str, value: &str, kind: &str, tags: &[String]) -> String {
    if tags.is_empty() {
        format!("{}:{}|{}", name, value, kind)
    } else {
        format!("{}:{}|{}|#{}", name, value, kind, tags.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_counter_with_tags() {
        let tags = vec!["status:200".to_string(), "method:GET".to_string()];
        assert_eq!(
            encode("app1.http.response.count_total", "1", "c", &tags),
            "app1.http.response.count_total:1|c|#status:200,method:GET"
        );
    }

    #[test]
    fn test_encode_without_tags() {
        assert_eq!(encode("app1.up", "1", "g", &[]), "app1.up:1|g");
    }

    #[test]
    fn test_encode_histogram() {
        assert_eq!(
            encode("app1.http.response.time_seconds", "0.25", "h", &[]),
            "app1.http.response.time_seconds:0.25|h"
        );
    }

    #[test]
    fn test_send_is_fire_and_forget() {
        // nothing listens on this port; sends must not error or block
        let client = StatsdClient::connect("127.0.0.1:18125").unwrap();
        client.incr("x", &[]);
        client.count("x", 7, &[]);
        client.histogram("x", 0.5, &[]);
        client.gauge("x", 1.0, &[]);
    }
}
