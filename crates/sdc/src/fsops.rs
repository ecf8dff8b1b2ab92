//! Filesystem mover: atomic moves, copies, digests and stability checks.
//!
//! Every move leaves either the source or the destination in place if it is
//! interrupted. Same-filesystem moves are a single `rename`; cross-device
//! moves copy into a temp sibling of the destination, fsync, rename into
//! place, and only then unlink the source.

use crate::error::Result;
use flate2::read::MultiGzDecoder;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const DIGEST_CHUNK: usize = 64 * 1024;

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Split a path into its directory and file name as catalog strings.
pub fn dir_and_name(path: &Path) -> Option<(String, String)> {
    let name = path.file_name()?.to_str()?.to_string();
    let dir = parent_dir(path).to_str()?.to_string();
    Some((dir, name))
}

/// `dir/name`, or `dir/name.N` with the smallest `N` that is free.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    (1u32..)
        .map(|n| dir.join(format!("{}.{}", name, n)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Move `src` to `dst`, replacing `dst` if it exists.
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device(&err) => {
            debug!(src = %src.display(), dst = %dst.display(), "Cross-device move");
            copy_via_temp(src, dst)?;
            fs::remove_file(src)?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Copy into a temp sibling of `dst`, fsync, then rename over `dst`.
fn copy_via_temp(src: &Path, dst: &Path) -> Result<()> {
    let mut input = File::open(src)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".sdc-move-")
        .tempfile_in(parent_dir(dst))?;
    io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), input.metadata()?.permissions())?;
    tmp.persist(dst).map_err(|err| err.error)?;
    Ok(())
}

/// Bytewise copy. Returns the number of bytes copied.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    Ok(fs::copy(src, dst)?)
}

/// Add the "read by others" permission bit.
pub fn ensure_world_readable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        let mode = perms.mode();
        if mode & 0o004 == 0 {
            perms.set_mode(mode | 0o004);
            fs::set_permissions(path, perms)?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Create `dir` and its missing parents with mode 0755.
pub fn create_dir_0755(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir)?;
    Ok(())
}

/// True when the file starts with the gzip magic bytes.
pub fn is_gzip(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path)?;
    let mut read = 0;
    while read < magic.len() {
        let n = file.read(&mut magic[read..])?;
        if n == 0 {
            return Ok(false);
        }
        read += n;
    }
    Ok(magic == GZIP_MAGIC)
}

/// Decompress `src` into `dst` atomically (temp sibling, then rename).
pub fn gunzip_to(src: &Path, dst: &Path) -> Result<u64> {
    let mut decoder = MultiGzDecoder::new(io::BufReader::new(File::open(src)?));
    let mut tmp = tempfile::Builder::new()
        .prefix(".sdc-gunzip-")
        .tempfile_in(parent_dir(dst))?;
    let written = io::copy(&mut decoder, tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst).map_err(|err| err.error)?;
    Ok(written)
}

/// Decompress a gzip file to its sibling without the `.gz` suffix and delete
/// the original. Returns the decompressed path.
pub fn unzip_in_place(src: &Path) -> Result<PathBuf> {
    let dst = match src.to_str().and_then(|s| s.strip_suffix(".gz")) {
        Some(stripped) => PathBuf::from(stripped),
        None => src.with_extension(""),
    };
    gunzip_to(src, &dst)?;
    fs::remove_file(src)?;
    debug!(src = %src.display(), dst = %dst.display(), "Decompressed in place");
    Ok(dst)
}

/// Lowercase hex MD5 of everything `reader` yields.
pub fn md5_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; DIGEST_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Lowercase hex MD5 of a file's contents.
pub fn md5_file(path: &Path) -> Result<String> {
    Ok(md5_reader(File::open(path)?)?)
}

/// True iff sizes are equal and full MD5 digests are equal.
pub fn files_are_same(a: &Path, b: &Path) -> Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(md5_file(a)? == md5_file(b)?)
}

/// `now - mtime > age`. A modification time in the future is never old enough.
pub fn file_is_old_enough(path: &Path, age: Duration) -> Result<bool> {
    let mtime = fs::metadata(path)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(mtime)
        .map(|elapsed| elapsed > age)
        .unwrap_or(false))
}

/// Whether any process on this host holds `path` open.
///
/// Scans `/proc/<pid>/fd`. Processes whose descriptors cannot be read
/// (other users) are skipped; hosts without `/proc` report `false`.
pub fn file_is_open(path: &Path) -> bool {
    let target = match fs::canonicalize(path) {
        Ok(target) => target,
        Err(_) => return false,
    };
    let Ok(procs) = fs::read_dir("/proc") else {
        return false;
    };
    for proc_entry in procs.flatten() {
        let is_pid = proc_entry
            .file_name()
            .to_str()
            .map(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false);
        if !is_pid {
            continue;
        }
        let Ok(fds) = fs::read_dir(proc_entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if fs::read_link(fd.path()).map(|link| link == target).unwrap_or(false) {
                return true;
            }
        }
    }
    false
}

/// Old enough, not open, and still old enough after the open check.
///
/// The second age check catches a producer that reopened the file while
/// `/proc` was being scanned.
pub fn file_is_stable(path: &Path, age: Duration) -> Result<bool> {
    if !file_is_old_enough(path, age)? {
        return Ok(false);
    }
    if file_is_open(path) {
        return Ok(false);
    }
    file_is_old_enough(path, age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    #[test]
    fn test_move_replaces_destination() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a");
        let dst = tmp.path().join("b");
        fs::write(&src, b"new").unwrap();
        fs::write(&dst, b"old").unwrap();

        move_file(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"new");
    }

    #[test]
    fn test_copy_via_temp_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a");
        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        fs::write(&src, b"payload").unwrap();

        copy_via_temp(&src, &out.join("a")).unwrap();
        let names: Vec<_> = fs::read_dir(&out).unwrap().flatten().map(|e| e.file_name()).collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a")]);
        assert!(src.exists());
    }

    #[test]
    fn test_unique_path_and_split() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(unique_path(tmp.path(), "f"), tmp.path().join("f"));
        fs::write(tmp.path().join("f"), b"x").unwrap();
        fs::write(tmp.path().join("f.1"), b"x").unwrap();
        assert_eq!(unique_path(tmp.path(), "f"), tmp.path().join("f.2"));

        let (dir, name) = dir_and_name(&tmp.path().join("f")).unwrap();
        assert_eq!(name, "f");
        assert_eq!(Path::new(&dir), tmp.path());
    }

    #[test]
    fn test_md5_and_same() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        let c = tmp.path().join("c");
        fs::write(&a, b"").unwrap();
        fs::write(&b, b"").unwrap();
        fs::write(&c, b"x").unwrap();
        assert_eq!(md5_file(&a).unwrap(), "d41d8cd98f00b204e9800998ecf8427e");
        assert!(files_are_same(&a, &b).unwrap());
        assert!(!files_are_same(&a, &c).unwrap());
    }

    #[test]
    fn test_unzip_in_place() {
        let tmp = TempDir::new().unwrap();
        let gz = tmp.path().join("x.cdf.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"hello").unwrap();
        encoder.finish().unwrap();

        assert!(is_gzip(&gz).unwrap());
        let out = unzip_in_place(&gz).unwrap();
        assert_eq!(out, tmp.path().join("x.cdf"));
        assert!(!gz.exists());
        assert_eq!(fs::read(&out).unwrap(), b"hello");
        assert!(!is_gzip(&out).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_world_readable_and_dir_mode() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, b"x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o600)).unwrap();
        ensure_world_readable(&file).unwrap();
        assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o604);

        let dir = tmp.path().join("a/b");
        create_dir_0755(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_stability_checks() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("young");
        fs::write(&file, b"x").unwrap();
        assert!(!file_is_old_enough(&file, Duration::from_secs(3600)).unwrap());
        assert!(!file_is_stable(&file, Duration::from_secs(3600)).unwrap());

        let old = SystemTime::now() - Duration::from_secs(7200);
        filetime::set_file_mtime(&file, filetime::FileTime::from_system_time(old)).unwrap();
        assert!(file_is_old_enough(&file, Duration::from_secs(3600)).unwrap());
        assert!(file_is_stable(&file, Duration::from_secs(3600)).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_file_is_open_sees_own_handle() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("held");
        let handle = File::create(&path).unwrap();
        assert!(file_is_open(&path));
        drop(handle);
        assert!(!file_is_open(&path));
    }
}
