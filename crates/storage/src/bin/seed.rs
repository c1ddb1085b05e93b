use std::fmt;

use chrono::{DateTime, Utc};
use course_core::model::{
    Course, CourseId, OptionDraft, QuestionKind, Section, SectionId, Test, TestId, TestOwner,
    validate_option_drafts,
};
use storage::repository::{
    NewCourseRecord, NewQuestionRecord, NewSectionRecord, NewTestRecord, Storage,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    title: String,
    category: String,
    sections: u32,
    children: u32,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidSections { raw: String },
    InvalidChildren { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidSections { raw } => write!(f, "invalid --sections value: {raw}"),
            ArgsError::InvalidChildren { raw } => write!(f, "invalid --children value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
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

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("COURSE_DB_URL")
            .unwrap_or_else(|_| "sqlite://courses.sqlite3?mode=rwc".into());
        let mut title = std::env::var("COURSE_TITLE").unwrap_or_else(|_| "Intro to Rust".into());
        let mut category =
            std::env::var("COURSE_CATEGORY").unwrap_or_else(|_| "programming".into());
        let mut sections = std::env::var("COURSE_SECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(3);
        let mut children = std::env::var("COURSE_CHILDREN")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(2);
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--title" => {
                    title = require_value(&mut args, "--title")?;
                }
                "--category" => {
                    category = require_value(&mut args, "--category")?;
                }
                "--sections" => {
                    let value = require_value(&mut args, "--sections")?;
                    sections = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidSections { raw: value.clone() })?;
                }
                "--children" => {
                    let value = require_value(&mut args, "--children")?;
                    children = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidChildren { raw: value.clone() })?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            title,
            category,
            sections,
            children,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://courses.sqlite3?mode=rwc)");
    eprintln!("  --title <text>            Course title (default: Intro to Rust)");
    eprintln!("  --category <text>         Course category (default: programming)");
    eprintln!("  --sections <n>            Number of root sections (default: 3)");
    eprintln!("  --children <n>            Child sections under each root (default: 2)");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!(
        "  COURSE_DB_URL, COURSE_TITLE, COURSE_CATEGORY, COURSE_SECTIONS, COURSE_CHILDREN, RUST_LOG"
    );
}

async fn insert_section(
    storage: &Storage,
    course_id: CourseId,
    parent_id: Option<SectionId>,
    title: String,
    order_index: i64,
    now: DateTime<Utc>,
) -> Result<SectionId, Box<dyn std::error::Error>> {
    // the placeholder id is replaced by the store
    let draft = Section::new(
        SectionId::new(0),
        course_id,
        parent_id,
        title.clone(),
        Some(format!("Notes for {title}.")),
        order_index,
        now,
    )?;
    Ok(storage
        .sections
        .insert_section(NewSectionRecord::from_section(&draft))
        .await?)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let draft = Course::new(
        CourseId::new(0),
        args.title.clone(),
        args.category.clone(),
        true,
        0,
        now,
    )?;
    let course_id = storage
        .courses
        .insert_course(NewCourseRecord::from_course(&draft))
        .await?;

    let mut section_count = 0_u32;
    for root in 0..args.sections {
        let root_id = insert_section(
            &storage,
            course_id,
            None,
            format!("Chapter {}", root + 1),
            i64::from(root),
            now,
        )
        .await?;
        section_count += 1;
        for child in 0..args.children {
            insert_section(
                &storage,
                course_id,
                Some(root_id),
                format!("Lesson {}.{}", root + 1, child + 1),
                i64::from(child),
                now,
            )
            .await?;
            section_count += 1;
        }
    }

    let test = Test::new(
        TestId::new(0),
        TestOwner::Course(course_id),
        "Final quiz",
        60,
        15,
        true,
        now,
    )?;
    let test_id = storage
        .tests
        .insert_test(NewTestRecord::from_test(&test))
        .await?;

    let questions = [
        (
            "Which keyword declares an immutable binding?",
            QuestionKind::SingleChoice,
            vec![OptionDraft::new("let", true), OptionDraft::new("var", false)],
        ),
        (
            "Which types implement Copy?",
            QuestionKind::MultipleChoice,
            vec![
                OptionDraft::new("u32", true),
                OptionDraft::new("bool", true),
                OptionDraft::new("String", false),
            ],
        ),
    ];
    for (index, (text, kind, options)) in questions.into_iter().enumerate() {
        validate_option_drafts(kind, &options)?;
        storage
            .tests
            .insert_question(NewQuestionRecord {
                test_id,
                text: text.to_owned(),
                kind,
                points: 1,
                order_index: i64::try_from(index)?,
                options,
            })
            .await?;
    }

    tracing::info!(
        course_id = course_id.value(),
        sections = section_count,
        test_id = test_id.value(),
        "seeded demo course"
    );
    println!(
        "Seeded course {} with {} sections and 1 test into {}",
        course_id.value(),
        section_count,
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
