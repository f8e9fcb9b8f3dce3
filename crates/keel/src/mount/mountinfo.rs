//! `/proc/self/mountinfo` parsing.

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

/// Default location of the mount table for this process.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// One entry of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Unique mount ID.
    pub mount_id: u32,
    /// ID of the parent mount.
    pub parent_id: u32,
    /// Mount point relative to the process root.
    pub mount_point: PathBuf,
    /// Filesystem type.
    pub fstype: String,
    /// Filesystem-specific source (`server:/export`, `/dev/sda1`).
    pub source: String,
}

/// Parse the mount table. Malformed lines are skipped.
#[must_use]
pub fn parse(contents: &str) -> Vec<MountEntry> {
    contents.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MountEntry> {
    // 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw
    let (left, right) = line.split_once(" - ")?;

    let mut fields = left.split_whitespace();
    let mount_id = fields.next()?.parse().ok()?;
    let parent_id = fields.next()?.parse().ok()?;
    let _major_minor = fields.next()?;
    let _root = fields.next()?;
    let mount_point = fields.next()?;

    let mut fields = right.split_whitespace();
    let fstype = fields.next()?;
    let source = fields.next().unwrap_or("none");

    Some(MountEntry {
        mount_id,
        parent_id,
        mount_point: PathBuf::from(OsString::from_vec(unescape(mount_point))),
        fstype: fstype.to_string(),
        source: String::from_utf8_lossy(&unescape(source)).into_owned(),
    })
}

/// Decode the kernel's `\ooo` octal escapes (space, tab, newline, backslash).
fn unescape(field: &str) -> Vec<u8> {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, digit| acc * 8 + u32::from(digit - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
45 22 0:40 / /var/lib/keel/volumes/media/_data rw,relatime shared:30 - nfs4 nas.local:/export/media rw,vers=4.2
46 22 0:41 / /mnt/with\\040space rw - cifs //nas/share\\040one rw
garbage line
";

    #[test]
    fn parses_entries() {
        let entries = parse(SAMPLE);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].mount_point, PathBuf::from("/"));
        assert_eq!(entries[0].fstype, "ext4");

        assert_eq!(entries[1].mount_id, 45);
        assert_eq!(entries[1].parent_id, 22);
        assert_eq!(
            entries[1].mount_point,
            PathBuf::from("/var/lib/keel/volumes/media/_data")
        );
        assert_eq!(entries[1].fstype, "nfs4");
        assert_eq!(entries[1].source, "nas.local:/export/media");
    }

    #[test]
    fn decodes_octal_escapes() {
        let entries = parse(SAMPLE);
        assert_eq!(entries[2].mount_point, PathBuf::from("/mnt/with space"));
        assert_eq!(entries[2].source, "//nas/share one");
    }

    #[test]
    fn unescape_leaves_other_backslashes() {
        assert_eq!(unescape(r"a\134b"), b"a\\b");
        assert_eq!(unescape(r"a\011b"), b"a\tb");
        assert_eq!(unescape(r"a\9zz"), br"a\9zz");
        assert_eq!(unescape(r"tail\04"), br"tail\04");
    }
}
