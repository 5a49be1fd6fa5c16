//! Single-member `.tar.gz` containers for encrypted snapshots.

use std::io::{self, Read};

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Pack `data` as the only file of a gzip-compressed tar archive.
pub fn pack(member_name: &str, data: &[u8]) -> io::Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o600);
    header.set_mtime(Utc::now().timestamp().max(0) as u64);
    builder.append_data(&mut header, member_name, data)?;

    builder.into_inner()?.finish()
}

/// Name and content of the first regular file in a `.tar.gz` archive.
pub fn unpack_single(archive: &[u8]) -> io::Result<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(GzDecoder::new(archive));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content)?;
        return Ok((name, content));
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "archive contains no file"))
}
