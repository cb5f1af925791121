#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use evidence_seeker::sources::remote::RetryPolicy;
use evidence_seeker::sources::{RemoteOptions, StagingArea};

/// A small mixed iOS/Android extraction.
pub const EVIDENCE_FILES: &[(&str, &[u8])] = &[
    ("private/var/mobile/Library/SMS/sms.db", b"SQLite format 3\0sms"),
    ("private/var/mobile/Library/Preferences/com.apple.springboard.plist", b"bplist00"),
    ("data/com.android.chrome/History.db", b"SQLite format 3\0history"),
    ("data/com.android.chrome/History.db-wal", b"wal"),
    ("notes.txt", b"examiner notes"),
];

pub fn write_tree(root: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    for (path, content) in entries {
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, content)?;
    }
    Ok(())
}

pub fn write_zip(archive: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    let mut writer = zip::ZipWriter::new(File::create(archive)?);
    let options = zip::write::FileOptions::default();
    for (path, content) in entries {
        writer.start_file(*path, options)?;
        writer.write_all(content)?;
    }
    writer.finish()?;
    Ok(())
}

pub fn write_tar(archive: &Path, entries: &[(&str, &[u8])], gzip: bool) -> Result<()> {
    let file = File::create(archive)?;
    if gzip {
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        append_entries(tar::Builder::new(encoder), entries)?.finish()?;
    } else {
        append_entries(tar::Builder::new(file), entries)?;
    }
    Ok(())
}

fn append_entries<W: Write>(mut builder: tar::Builder<W>, entries: &[(&str, &[u8])]) -> Result<W> {
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_600_000_000);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, path, *content)?;
    }
    Ok(builder.into_inner()?)
}

pub fn staging(root: &Path) -> Arc<StagingArea> {
    Arc::new(StagingArea::create(root.join("staging"), false).unwrap())
}

/// Remote options with millisecond backoff so retry tests stay fast.
pub fn fast_remote_options(base_url: &str, max_retries: u32) -> RemoteOptions {
    RemoteOptions {
        base_url: base_url.to_string(),
        token: None,
        timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        verify_connection: true,
    }
}
