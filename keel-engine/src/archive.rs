//! Archive construction for file injection
//!
//! The runtime's copy API accepts a tar stream that is extracted relative to
//! a destination directory. Payloads are archived with fixed ownership and
//! timestamps so the same payload always yields identical bytes.

use bytes::Bytes;
use std::io;
use tar::{Builder, EntryType, Header};

/// Packages a single payload as a tar archive
///
/// `path` is the destination inside the container; a leading `/` is
/// stripped because archive entries are relative to the extraction root.
pub fn build_archive(path: &str, mode: u32, data: &[u8]) -> io::Result<Bytes> {
    let entry_path = path.trim_start_matches('/');
    if entry_path.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file destination {path:?}"),
        ));
    }

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);

    let mut builder = Builder::new(Vec::new());
    builder.append_data(&mut header, entry_path, data)?;
    Ok(Bytes::from(builder.into_inner()?))
}
