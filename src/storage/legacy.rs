// Legacy USERDATA.DAT favourites layout, all integers little endian:
//
//   "SAMP" | u32 version | u32 count | count x entry
//   entry = u32 len + address | u32 port | u32 len + hostname
//         | u32 len + server password | u32 len + rcon password
use byteorder::{ LittleEndian, ReadBytesExt, WriteBytesExt };
use std::io::{ Cursor, Read };

use crate::models::group::FavouriteEntry;
use crate::models::server::ServerAddress;

const MAGIC: &[u8; 4] = b"SAMP";
const VERSION: u32 = 1;
// Guards against garbage lengths in a corrupt file.
const MAX_FIELD_LEN: usize = 1024;

pub fn read_favourites(bytes: &[u8]) -> Result<Vec<FavouriteEntry>, String> {
    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).map_err(|e| e.to_string())?;
    if &magic != MAGIC {
        return Err("missing SAMP header".to_string());
    }

    let version = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    if version != VERSION {
        return Err(format!("unsupported version {}", version));
    }

    let count = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let mut entries = Vec::new();
    for i in 0..count {
        let entry = read_entry(&mut cursor).map_err(|e| format!("entry {}: {}", i, e))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn read_entry(cursor: &mut Cursor<&[u8]>) -> Result<FavouriteEntry, String> {
    let host = read_field(cursor)?;
    let port = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let port = u16::try_from(port).map_err(|_| format!("port {} out of range", port))?;
    let hostname = read_field(cursor)?;
    let server_password = read_field(cursor)?;
    let rcon_password = read_field(cursor)?;
    Ok(FavouriteEntry {
        address: ServerAddress::new(host, port),
        hostname,
        game_mode: String::new(),
        server_password,
        rcon_password,
    })
}

fn read_field(cursor: &mut Cursor<&[u8]>) -> Result<String, String> {
    let len = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())? as usize;
    if len > MAX_FIELD_LEN {
        return Err(format!("field length {} too large", len));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).map_err(|e| e.to_string())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn write_favourites(entries: &[FavouriteEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    // Writes into a Vec cannot fail.
    let _ = write_body(&mut out, entries);
    out
}

fn write_body(out: &mut Vec<u8>, entries: &[FavouriteEntry]) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(VERSION)?;
    out.write_u32::<LittleEndian>(entries.len() as u32)?;
    for entry in entries {
        write_field(out, &entry.address.host)?;
        out.write_u32::<LittleEndian>(entry.address.port as u32)?;
        write_field(out, &entry.hostname)?;
        write_field(out, &entry.server_password)?;
        write_field(out, &entry.rcon_password)?;
    }
    Ok(())
}

fn write_field(out: &mut Vec<u8>, text: &str) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(text.len() as u32)?;
    out.extend_from_slice(text.as_bytes());
    Ok(())
}
