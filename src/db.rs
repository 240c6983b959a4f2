use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::gateway::{EvidenceRow, EvidenceSnapshot};
use crate::models::{
    Activity, ActivityId, ActivityKind, EvidenceSource, RawState, StudentId, TimestampSet,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn seed_time(day: u32, hour: u32) -> anyhow::Result<Option<DateTime<Utc>>> {
    let at = Utc
        .with_ymd_and_hms(2026, 2, day, hour, 0, 0)
        .single()
        .context("invalid seed timestamp")?;
    Ok(Some(at))
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            "avery.lee@groupscholar.com",
            "2026",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            "jules.moreno@groupscholar.com",
            "2025",
        ),
    ];

    for (id, name, email, cohort) in students {
        sqlx::query(
            r#"
            INSERT INTO guardian_progress.students (id, full_name, email, cohort)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, cohort = EXCLUDED.cohort
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(cohort)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO guardian_progress.courses (id, title)
        VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title
        "#,
    )
    .bind(101_i64)
    .bind("Biology 101")
    .execute(pool)
    .await?;

    let activities = vec![
        (1000_i64, "Week 1: Cells", "subsection", 1, true),
        (1001, "Cell diagram", "assign", 2, false),
        (1002, "Organelle check-in", "quiz", 3, false),
        (1003, "Reading: membranes", "page", 4, true),
        (1010, "Unit test", "quiz", 5, true),
    ];

    for (id, name, kind, position, tracking_enabled) in activities {
        sqlx::query(
            r#"
            INSERT INTO guardian_progress.activities
            (id, course_id, name, kind, position, tracking_enabled)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, kind = EXCLUDED.kind,
                position = EXCLUDED.position, tracking_enabled = EXCLUDED.tracking_enabled
            "#,
        )
        .bind(id)
        .bind(101_i64)
        .bind(name)
        .bind(kind)
        .bind(position)
        .bind(tracking_enabled)
        .execute(pool)
        .await?;
    }

    for (position, child_id) in [1001_i64, 1002, 1003].into_iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO guardian_progress.activity_children (container_id, child_id, position)
            VALUES ($1, $2, $3)
            ON CONFLICT (container_id, child_id) DO NOTHING
            "#,
        )
        .bind(1000_i64)
        .bind(child_id)
        .bind(position as i32)
        .execute(pool)
        .await?;
    }

    let evidence = vec![
        (
            "seed-001",
            "avery.lee@groupscholar.com",
            1001_i64,
            "module_submission",
            "graded",
            TimestampSet {
                started_at: seed_time(2, 9)?,
                completed_at: seed_time(4, 16)?,
                updated_at: seed_time(5, 10)?,
            },
        ),
        (
            "seed-002",
            "avery.lee@groupscholar.com",
            1002,
            "module_attempt",
            "inprogress",
            TimestampSet {
                started_at: seed_time(6, 14)?,
                completed_at: None,
                updated_at: seed_time(6, 15)?,
            },
        ),
        (
            "seed-003",
            "avery.lee@groupscholar.com",
            1003,
            "tracking_api",
            "complete",
            TimestampSet {
                started_at: seed_time(1, 8)?,
                completed_at: seed_time(1, 9)?,
                updated_at: seed_time(1, 9)?,
            },
        ),
        (
            "seed-004",
            "jules.moreno@groupscholar.com",
            1003,
            "access_log",
            "viewed",
            TimestampSet {
                started_at: seed_time(3, 19)?,
                completed_at: None,
                updated_at: None,
            },
        ),
        (
            "seed-005",
            "jules.moreno@groupscholar.com",
            1010,
            "tracking_table",
            "complete_fail",
            TimestampSet {
                started_at: seed_time(10, 13)?,
                completed_at: seed_time(10, 14)?,
                updated_at: seed_time(10, 14)?,
            },
        ),
    ];

    for (source_key, email, activity_id, source, state, timestamps) in evidence {
        let student_id = find_student(pool, email).await?;
        insert_evidence(
            pool,
            student_id,
            activity_id,
            source,
            state,
            &timestamps,
            source_key,
        )
        .await?;
    }

    Ok(())
}

async fn insert_evidence(
    pool: &PgPool,
    student_id: StudentId,
    activity_id: i64,
    source: &str,
    state: &str,
    timestamps: &TimestampSet,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO guardian_progress.evidence
        (id, student_id, activity_id, source, state, started_at, completed_at, updated_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id.0)
    .bind(activity_id)
    .bind(source)
    .bind(state)
    .bind(timestamps.started_at)
    .bind(timestamps.completed_at)
    .bind(timestamps.updated_at)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_student(pool: &PgPool, email: &str) -> anyhow::Result<StudentId> {
    let row = sqlx::query("SELECT id FROM guardian_progress.students WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no student with email {email}"))?;
    Ok(StudentId(row.get("id")))
}

pub async fn fetch_course_title(pool: &PgPool, course_id: i64) -> anyhow::Result<String> {
    let row = sqlx::query("SELECT title FROM guardian_progress.courses WHERE id = $1")
        .bind(course_id)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no course with id {course_id}"))?;
    Ok(row.get("title"))
}

/// Reads a course's activity graph and one student's evidence into memory.
pub async fn load_snapshot(
    pool: &PgPool,
    course_id: i64,
    student_id: StudentId,
) -> anyhow::Result<EvidenceSnapshot> {
    let mut snapshot = EvidenceSnapshot::new();

    let activities = sqlx::query(
        r#"
        SELECT id, name, kind, tracking_enabled, visible, deleted
        FROM guardian_progress.activities
        WHERE course_id = $1
        ORDER BY position, id
        "#,
    )
    .bind(course_id)
    .fetch_all(pool)
    .await
    .context("failed to load activities")?;

    for row in activities {
        let id: i64 = row.get("id");
        let kind: String = row.get("kind");
        let kind = kind
            .parse::<ActivityKind>()
            .with_context(|| format!("activity {id} has an unsupported kind"))?;
        let visible: bool = row.get("visible");
        let deleted: bool = row.get("deleted");
        snapshot.insert_activity(
            Activity::new(id, row.get::<String, _>("name"), kind),
            row.get("tracking_enabled"),
            visible && !deleted,
        );
    }

    let edges = sqlx::query(
        r#"
        SELECT ac.container_id, ac.child_id
        FROM guardian_progress.activity_children ac
        JOIN guardian_progress.activities a ON a.id = ac.container_id
        WHERE a.course_id = $1
        ORDER BY ac.container_id, ac.position, ac.child_id
        "#,
    )
    .bind(course_id)
    .fetch_all(pool)
    .await
    .context("failed to load activity children")?;

    for row in edges {
        snapshot.link_child(
            ActivityId(row.get("container_id")),
            ActivityId(row.get("child_id")),
        );
    }

    let evidence = sqlx::query(
        r#"
        SELECT e.activity_id, e.source, e.state, e.started_at, e.completed_at, e.updated_at
        FROM guardian_progress.evidence e
        JOIN guardian_progress.activities a ON a.id = e.activity_id
        WHERE a.course_id = $1 AND e.student_id = $2
        ORDER BY e.recorded_at
        "#,
    )
    .bind(course_id)
    .bind(student_id.0)
    .fetch_all(pool)
    .await
    .context("failed to load evidence")?;

    for row in evidence {
        let source: String = row.get("source");
        let source = source.parse::<EvidenceSource>()?;
        snapshot.push_evidence(EvidenceRow::new(
            row.get("activity_id"),
            student_id,
            source,
            row.get::<String, _>("state"),
            TimestampSet {
                started_at: row.get("started_at"),
                completed_at: row.get("completed_at"),
                updated_at: row.get("updated_at"),
            },
        ));
    }

    tracing::debug!(
        course_id,
        student_id = %student_id,
        evidence_rows = snapshot.evidence_count(),
        "evidence snapshot loaded"
    );

    Ok(snapshot)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        cohort: String,
        activity_id: i64,
        source: String,
        state: String,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV record {}", index + 1))?;
        let source = row
            .source
            .parse::<EvidenceSource>()
            .with_context(|| format!("invalid source in CSV record {}", index + 1))?;
        RawState::parse(source, &row.state)
            .with_context(|| format!("invalid state in CSV record {}", index + 1))?;

        let student_id: Uuid = sqlx::query(
            r#"
            INSERT INTO guardian_progress.students
            (id, full_name, email, cohort)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, cohort = EXCLUDED.cohort
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.full_name)
        .bind(&row.email)
        .bind(&row.cohort)
        .fetch_one(pool)
        .await?
        .get("id");

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let timestamps = TimestampSet {
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        };

        if insert_evidence(
            pool,
            StudentId(student_id),
            row.activity_id,
            source.as_str(),
            row.state.trim(),
            &timestamps,
            &source_key,
        )
        .await?
        {
            inserted += 1;
        }
    }

    tracing::info!(inserted, path = %csv_path.display(), "evidence import finished");
    Ok(inserted)
}
