//! Test utilities for evidence_seeker
//!
//! Fixture builders for evidence trees and archives shared by the unit test
//! modules.

#![cfg(test)]

use anyhow::Result;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Files laid out like a small mixed iOS/Android extraction.
pub const EVIDENCE_FILES: &[(&str, &[u8])] = &[
    ("private/var/mobile/Library/SMS/sms.db", b"SQLite format 3\0sms"),
    (
        "private/var/mobile/Library/Preferences/com.apple.springboard.plist",
        b"bplist00",
    ),
    ("data/com.android.chrome/History.db", b"SQLite format 3\0history"),
    ("data/com.android.chrome/History.db-wal", b"wal"),
    ("notes.txt", b"examiner notes"),
];

/// Writes [`EVIDENCE_FILES`] under `root`.
pub fn create_test_evidence_tree(root: &Path) -> Result<()> {
    for (path, content) in EVIDENCE_FILES {
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, content)?;
    }
    Ok(())
}

/// Builds a zip archive holding `entries`, plus a Finder `__MACOSX` shadow.
pub fn create_test_zip(archive: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    let file = File::create(archive)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(
            zip::DateTime::from_date_and_time(2021, 6, 15, 12, 30, 0)
                .map_err(|_| anyhow::anyhow!("invalid zip timestamp"))?,
        );

    for (path, content) in entries {
        writer.start_file(*path, options)?;
        writer.write_all(content)?;
    }
    writer.add_directory("__MACOSX/", options)?;
    writer.start_file("__MACOSX/._notes.txt", options)?;
    writer.write_all(b"resource fork")?;
    writer.finish()?;
    Ok(())
}

/// Builds a tar archive (optionally gzip-compressed) holding `entries`.
pub fn create_test_tar(archive: &Path, entries: &[(&str, &[u8])], gzip: bool) -> Result<()> {
    let file = File::create(archive)?;
    if gzip {
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let encoder = append_tar_entries(tar::Builder::new(encoder), entries)?;
        encoder.finish()?;
    } else {
        append_tar_entries(tar::Builder::new(file), entries)?;
    }
    Ok(())
}

fn append_tar_entries<W: Write>(mut builder: tar::Builder<W>, entries: &[(&str, &[u8])]) -> Result<W> {
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_623_760_200);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, path, *content)?;
    }
    Ok(builder.into_inner()?)
}
