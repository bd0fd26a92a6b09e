use log::warn;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/**
 * @brief Append one line to the operation journal, creating it if missing.
 * @param path Path to the journal file.
 * @param line Text line to append.
 *
 * Failures are logged and otherwise ignored.
 */
pub fn write_line(path: &Path, line: &str) {
    if let Some(dir) = path.parent() {
        let _ = fs::create_dir_all(dir);
    }
    let res = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{}", line));
    if let Err(e) = res {
        warn!("could not append to journal {}: {}", path.display(), e);
    }
}
