use std::fmt;

use course_core::model::{CourseId, CourseProgress, UserId};
use serde::Serialize;
use services::{AppServices, Clock, SectionVisit};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingCommand,
    UnknownCommand(String),
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    Required { flag: &'static str, env: &'static str },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingCommand => write!(f, "missing command (try --help)"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::Required { flag, env } => write!(f, "{flag} (or {env}) is required"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_id(flag: &'static str, raw: &str) -> Result<u64, ArgsError> {
    raw.trim().parse::<u64>().map_err(|_| ArgsError::InvalidId {
        flag,
        raw: raw.to_string(),
    })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- courses  [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- outline  --course-id <id> [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- progress --user-id <id> [--course-id <id>] [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- stats    --user-id <id> [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://courses.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  COURSE_DB_URL, COURSE_USER_ID, COURSE_COURSE_ID, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Courses,
    Outline,
    Progress,
    Stats,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "courses" => Some(Self::Courses),
            "outline" => Some(Self::Outline),
            "progress" => Some(Self::Progress),
            "stats" => Some(Self::Stats),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    db_url: String,
    user_id: Option<UserId>,
    course_id: Option<CourseId>,
}

impl Args {
    fn from_env() -> Self {
        let db_url = std::env::var("COURSE_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://courses.sqlite3".into(), normalize_sqlite_url);
        let user_id = std::env::var("COURSE_USER_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(UserId::new);
        let course_id = std::env::var("COURSE_COURSE_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(CourseId::new);
        Self {
            db_url,
            user_id,
            course_id,
        }
    }

    /// Apply command-line flags on top of `self`.
    fn parse_flags(mut self, args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    self.db_url = normalize_sqlite_url(value);
                }
                "--user-id" => {
                    let value = require_value(args, "--user-id")?;
                    self.user_id = Some(UserId::new(parse_id("--user-id", &value)?));
                }
                "--course-id" => {
                    let value = require_value(args, "--course-id")?;
                    self.course_id = Some(CourseId::new(parse_id("--course-id", &value)?));
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(self)
    }

    fn user(&self) -> Result<UserId, ArgsError> {
        self.user_id.ok_or(ArgsError::Required {
            flag: "--user-id",
            env: "COURSE_USER_ID",
        })
    }

    fn course(&self) -> Result<CourseId, ArgsError> {
        self.course_id.ok_or(ArgsError::Required {
            flag: "--course-id",
            env: "COURSE_COURSE_ID",
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct CourseReport {
    progress: CourseProgress,
    sections: Vec<SectionVisit>,
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let cmd = match argv.next() {
        None => return Err(ArgsError::MissingCommand.into()),
        Some(arg) if arg == "--help" || arg == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(arg) => Command::from_arg(&arg).ok_or(ArgsError::UnknownCommand(arg))?,
    };
    let args = Args::from_env().parse_flags(&mut argv)?;

    prepare_sqlite_file(&args.db_url)?;
    let app = AppServices::new_sqlite(&args.db_url, Clock::default()).await?;
    tracing::debug!(command = ?cmd, db_url = %args.db_url, "services ready");

    match cmd {
        Command::Courses => print_json(&app.courses().list_courses().await?)?,
        Command::Outline => {
            let course_id = args.course()?;
            print_json(&app.sections().list_root_sections(course_id).await?)?;
        }
        Command::Progress => {
            let user_id = args.user()?;
            match args.course_id {
                Some(course_id) => {
                    let progress = app.progress();
                    let report = CourseReport {
                        progress: progress
                            .get_or_create_course_progress(user_id, course_id)
                            .await?,
                        sections: progress
                            .section_progress_for_course(user_id, course_id)
                            .await?,
                    };
                    print_json(&report)?;
                }
                None => print_json(&app.progress().list_user_progress(user_id).await?)?,
            }
        }
        Command::Stats => {
            let user_id = args.user()?;
            print_json(&app.progress().user_stats(user_id).await?)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(raw: &[&str]) -> Result<Args, ArgsError> {
        let base = Args {
            db_url: "sqlite://courses.sqlite3".into(),
            user_id: None,
            course_id: None,
        };
        base.parse_flags(&mut raw.iter().map(ToString::to_string))
    }

    #[test]
    fn commands_parse() {
        assert_eq!(Command::from_arg("outline"), Some(Command::Outline));
        assert_eq!(Command::from_arg("stats"), Some(Command::Stats));
        assert_eq!(Command::from_arg("ui"), None);
    }

    #[test]
    fn flags_override_defaults() {
        let args =
            flags(&["--user-id", "7", "--course-id", "3", "--db", "sqlite::memory:"]).unwrap();
        assert_eq!(args.user_id, Some(UserId::new(7)));
        assert_eq!(args.course_id, Some(CourseId::new(3)));
        assert_eq!(args.db_url, "sqlite::memory:");
    }

    #[test]
    fn bad_flags_are_reported() {
        assert!(matches!(
            flags(&["--user-id", "x"]),
            Err(ArgsError::InvalidId { flag: "--user-id", .. })
        ));
        assert!(matches!(flags(&["--db"]), Err(ArgsError::MissingValue { flag: "--db" })));
        assert!(matches!(flags(&["--verbose"]), Err(ArgsError::UnknownArg(_))));
        assert!(matches!(
            flags(&[]).unwrap().user(),
            Err(ArgsError::Required { flag: "--user-id", .. })
        ));
    }

    #[test]
    fn relative_paths_become_absolute_urls() {
        let url = normalize_sqlite_url("sqlite:data/courses.sqlite3".into());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/courses.sqlite3"));
        assert_eq!(
            normalize_sqlite_url("sqlite://already.db".into()),
            "sqlite://already.db"
        );
    }
}
