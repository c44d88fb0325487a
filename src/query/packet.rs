// SA-MP query packets.
//
// Every datagram starts with "SAMP", the target's IPv4 octets, its port
// (u16 LE) and a one-byte opcode. Replies repeat the header.
use byteorder::{ LittleEndian, ReadBytesExt, WriteBytesExt };
use std::io::{ Cursor, Read };
use std::net::{ Ipv4Addr, SocketAddrV4 };
use thiserror::Error;

use crate::models::query::RequestKind;
use crate::models::server::{ Client, QueryRequest, QueryResponse, Rule, ServerInfo };

pub const MAGIC: &[u8; 4] = b"SAMP";
pub const HEADER_LEN: usize = 11;
pub const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("datagram too short ({0} bytes)")]
    TooShort(usize),
    #[error("missing SAMP magic")]
    BadMagic,
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("truncated {kind} reply: {source}")]
    Truncated {
        kind: RequestKind,
        #[source]
        source: std::io::Error,
    },
}

pub fn encode_request(target: SocketAddrV4, request: &QueryRequest) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + 4);
    write_header(&mut packet, target, request.kind);
    if request.kind == RequestKind::Ping {
        packet.extend_from_slice(&request.nonce.to_le_bytes());
    }
    packet
}

fn write_header(packet: &mut Vec<u8>, target: SocketAddrV4, kind: RequestKind) {
    packet.extend_from_slice(MAGIC);
    packet.extend_from_slice(&target.ip().octets());
    packet.extend_from_slice(&target.port().to_le_bytes());
    packet.push(kind.opcode());
}

/// Decodes a reply, returning the endpoint named in its header.
pub fn decode_response(buf: &[u8]) -> Result<(SocketAddrV4, QueryResponse), PacketError> {
    if buf.len() < HEADER_LEN {
        return Err(PacketError::TooShort(buf.len()));
    }
    if &buf[0..4] != MAGIC {
        return Err(PacketError::BadMagic);
    }

    let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
    let port = u16::from_le_bytes([buf[8], buf[9]]);
    let kind = RequestKind::from_opcode(buf[10]).ok_or(PacketError::UnknownOpcode(buf[10]))?;

    let mut body = Cursor::new(&buf[HEADER_LEN..]);
    let response = read_body(kind, &mut body).map_err(|source| PacketError::Truncated { kind, source })?;
    Ok((SocketAddrV4::new(ip, port), response))
}

fn read_body(kind: RequestKind, body: &mut Cursor<&[u8]>) -> std::io::Result<QueryResponse> {
    let response = match kind {
        RequestKind::Ping => QueryResponse::Ping { nonce: body.read_u32::<LittleEndian>()? },
        RequestKind::Information => {
            let password = body.read_u8()? != 0;
            let players = body.read_u16::<LittleEndian>()?;
            let max_players = body.read_u16::<LittleEndian>()?;
            let hostname = read_string_u32(body)?;
            let game_mode = read_string_u32(body)?;
            let language = read_string_u32(body)?;
            QueryResponse::Information(ServerInfo {
                password,
                players,
                max_players,
                hostname,
                game_mode,
                language,
            })
        }
        RequestKind::Rules => {
            let count = body.read_u16::<LittleEndian>()?;
            let mut rules = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = read_string_u8(body)?;
                let value = read_string_u8(body)?;
                rules.push(Rule { name, value });
            }
            QueryResponse::Rules(rules)
        }
        RequestKind::Clients => {
            let count = body.read_u16::<LittleEndian>()?;
            let mut clients = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = read_string_u8(body)?;
                let score = body.read_i32::<LittleEndian>()?;
                clients.push(Client { name, score });
            }
            QueryResponse::Clients(clients)
        }
    };
    Ok(response)
}

fn read_string_u8(body: &mut Cursor<&[u8]>) -> std::io::Result<String> {
    let len = body.read_u8()? as usize;
    read_string(body, len)
}

fn read_string_u32(body: &mut Cursor<&[u8]>) -> std::io::Result<String> {
    let len = body.read_u32::<LittleEndian>()? as usize;
    let remaining = body.get_ref().len().saturating_sub(body.position() as usize);
    if len > remaining {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    read_string(body, len)
}

fn read_string(body: &mut Cursor<&[u8]>, len: usize) -> std::io::Result<String> {
    let mut bytes = vec![0u8; len];
    body.read_exact(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Builds a reply the way a server would. Used by tests and local tooling.
pub fn encode_response(source: SocketAddrV4, response: &QueryResponse) -> Vec<u8> {
    let mut packet = Vec::with_capacity(64);
    write_header(&mut packet, source, response.kind());
    // Writes into a Vec cannot fail.
    let _ = write_body(&mut packet, response);
    packet
}

fn write_body(packet: &mut Vec<u8>, response: &QueryResponse) -> std::io::Result<()> {
    match response {
        QueryResponse::Ping { nonce } => packet.write_u32::<LittleEndian>(*nonce)?,
        QueryResponse::Information(info) => {
            packet.write_u8(info.password as u8)?;
            packet.write_u16::<LittleEndian>(info.players)?;
            packet.write_u16::<LittleEndian>(info.max_players)?;
            for text in [&info.hostname, &info.game_mode, &info.language] {
                packet.write_u32::<LittleEndian>(text.len() as u32)?;
                packet.extend_from_slice(text.as_bytes());
            }
        }
        QueryResponse::Rules(rules) => {
            packet.write_u16::<LittleEndian>(rules.len() as u16)?;
            for rule in rules {
                write_string_u8(packet, &rule.name)?;
                write_string_u8(packet, &rule.value)?;
            }
        }
        QueryResponse::Clients(clients) => {
            packet.write_u16::<LittleEndian>(clients.len() as u16)?;
            for client in clients {
                write_string_u8(packet, &client.name)?;
                packet.write_i32::<LittleEndian>(client.score)?;
            }
        }
    }
    Ok(())
}

fn write_string_u8(packet: &mut Vec<u8>, text: &str) -> std::io::Result<()> {
    let bytes = &text.as_bytes()[..text.len().min(u8::MAX as usize)];
    packet.write_u8(bytes.len() as u8)?;
    packet.extend_from_slice(bytes);
    Ok(())
}
