//! Song ratings, kept next to the music in a plain `ratings` file per
//! directory: one `<stars> <file name>` line per rated file.

use std::fs;
use std::io;
use std::path::Path;

pub const RATINGS_FILE: &str = "ratings";

fn split(path: &Path) -> Option<(&Path, &str)> {
    let dir = path.parent()?;
    let name = path.file_name()?.to_str()?;
    Some((dir, name))
}

fn parse_line(line: &str) -> Option<(i32, &str)> {
    let (stars, name) = line.split_once(' ')?;
    let stars: i32 = stars.parse().ok()?;
    (0..=5).contains(&stars).then_some((stars, name))
}

/// The stored rating of `path`, if any.
pub fn read_rating(path: &str) -> Option<i32> {
    let (dir, name) = split(Path::new(path))?;
    let contents = fs::read_to_string(dir.join(RATINGS_FILE)).ok()?;
    contents
        .lines()
        .filter_map(parse_line)
        .find(|(_, n)| *n == name)
        .map(|(stars, _)| stars)
}

/// Store `rating` for `path`, replacing an older one.
pub fn write_rating(path: &str, rating: i32) -> io::Result<()> {
    if !(0..=5).contains(&rating) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("rating {rating} out of range"),
        ));
    }
    let (dir, name) = split(Path::new(path))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not a file path"))?;
    let file = dir.join(RATINGS_FILE);

    let existing = match fs::read_to_string(&file) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let mut out = String::with_capacity(existing.len() + name.len() + 3);
    for line in existing.lines() {
        match parse_line(line) {
            Some((_, n)) if n == name => {}
            _ if line.is_empty() => {}
            _ => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out.push_str(&format!("{rating} {name}\n"));

    let tmp = dir.join(format!(".{RATINGS_FILE}.tmp"));
    fs::write(&tmp, out)?;
    fs::rename(&tmp, &file)
}
