use bytes::{Buf, Bytes, BytesMut};
use log::trace;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::{LiveError, Result};

/// One unit read off the RTSP connection.
#[derive(Debug, Clone, PartialEq)]
pub enum RTSPMessage {
    /// A complete response: status line, headers and body.
    Response(Bytes),
    /// A `$`-framed RTP or RTCP packet.
    Interleaved { channel: u8, data: Bytes },
}

/// Connects to the server and splits the stream into its two halves.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<(RTSPReader, RTSPWriter)> {
    let addr = format!("{}:{}", host, port);
    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| LiveError::Protocol(format!("Timed out connecting to {}", addr)))?
        .map_err(|e| LiveError::Protocol(format!("Failed to connect to {}: {}", addr, e)))?;

    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    let (read, write) = stream.into_split();

    Ok((
        RTSPReader {
            half: read,
            buffer: BytesMut::with_capacity(4096),
        },
        RTSPWriter { half: write, peer },
    ))
}

#[derive(Debug)]
pub struct RTSPReader {
    half: OwnedReadHalf,
    buffer: BytesMut,
}

impl RTSPReader {
    /// Reads until one whole message is buffered.
    pub async fn read_message(&mut self) -> Result<RTSPMessage> {
        loop {
            if let Some(message) = parse_message(&mut self.buffer) {
                return Ok(message);
            }
            let n = self.half.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(LiveError::Protocol("Connection closed by peer".into()));
            }
        }
    }
}

#[derive(Debug)]
pub struct RTSPWriter {
    half: OwnedWriteHalf,
    peer: SocketAddr,
}

impl RTSPWriter {
    pub fn peer_ip(&self) -> IpAddr {
        self.peer.ip()
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.half.write_all(data).await?;
        self.half.flush().await?;
        Ok(())
    }

    /// Sends one packet on an interleaved channel.
    pub async fn write_interleaved(&mut self, channel: u8, data: &[u8]) -> Result<()> {
        let len = u16::try_from(data.len())
            .map_err(|_| LiveError::InvalidData("interleaved packet too large".into()))?;
        let mut frame = Vec::with_capacity(4 + data.len());
        frame.push(b'$');
        frame.push(channel);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(data);
        self.write_all(&frame).await
    }

    pub async fn shutdown(&mut self) {
        let _ = self.half.shutdown().await;
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(headers: &[u8]) -> usize {
    String::from_utf8_lossy(headers)
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

/// Takes one complete message off the front of `buffer`, if there is one.
pub fn parse_message(buffer: &mut BytesMut) -> Option<RTSPMessage> {
    loop {
        match buffer.first()? {
            b'$' => {
                if buffer.len() < 4 {
                    return None;
                }
                let size = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
                if buffer.len() < 4 + size {
                    return None;
                }
                let channel = buffer[1];
                let frame = buffer.split_to(4 + size).freeze();
                return Some(RTSPMessage::Interleaved {
                    channel,
                    data: frame.slice(4..),
                });
            }
            b'R' => {
                let header_end = find_header_end(buffer)?;
                let total = header_end + 4 + content_length(&buffer[..header_end]);
                if buffer.len() < total {
                    return None;
                }
                return Some(RTSPMessage::Response(buffer.split_to(total).freeze()));
            }
            other => {
                // resynchronize on the next frame or status line
                trace!("Skipping stray byte {:#04x} on RTSP connection", other);
                buffer.advance(1);
            }
        }
    }
}
