use std::io::{Read, Result, Write};

const CHUNK: usize = 64 * 1024;

/// Copy `from` into `to`, reporting `(copied, total)` after every chunk. The
/// last report always has `copied == total`, even when `total` was stale.
pub fn copy_with_progress<F>(from: &mut dyn Read, to: &mut dyn Write, total: u64, mut on_progress: F) -> Result<u64>
where
    F: FnMut(u64, u64),
{
    let mut buf = vec![0u8; CHUNK];
    let mut copied = 0u64;
    let mut last_report = None;

    loop {
        let n = from.read(&mut buf)?;
        if n == 0 {
            break;
        }
        to.write_all(&buf[..n])?;
        copied += n as u64;
        let shown_total = total.max(copied);
        on_progress(copied, shown_total);
        last_report = Some((copied, shown_total));
    }
    to.flush()?;

    if last_report != Some((copied, copied)) {
        on_progress(copied, copied);
    }
    Ok(copied)
}
