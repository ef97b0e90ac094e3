//! SQLite-backed [`PersistenceGateway`], enabled by the `sqlite` feature.
//!
//! Each entity table stores its surrogate key plus a JSON blob of the row
//! (spec §6's "JSONB-equivalent column" note), which keeps this backend
//! honest about being a gateway rather than an ORM: callers only ever see
//! the typed entities via [`PersistenceGateway`], never raw SQL. A single
//! `rusqlite::Connection` behind a [`parking_lot::Mutex`] serializes access,
//! matching the in-memory backend's one-lock-is-the-transaction model; this
//! is the right tradeoff for an embedded single-file database, not for a
//! server-grade Postgres deployment.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::{BoxFuture, PersistenceGateway};
use crate::error::{Error, Result};
use crate::types::{
    AttemptId, AttemptStatus, Question, QuestionId, Section, SectionId, SectionProgress,
    Subsection, SubsectionId, SubsectionProgress, Test, TestAttempt, TestId, TestQuestion,
    Topic, TopicId, TopicProgress, UserId,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS topics (id INTEGER PRIMARY KEY, archived INTEGER NOT NULL, data TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS sections (id INTEGER PRIMARY KEY, topic_id INTEGER NOT NULL, archived INTEGER NOT NULL, data TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS subsections (id INTEGER PRIMARY KEY, section_id INTEGER NOT NULL, archived INTEGER NOT NULL, data TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS questions (id INTEGER PRIMARY KEY, topic_id INTEGER NOT NULL, archived INTEGER NOT NULL, data TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS tests (id INTEGER PRIMARY KEY, archived INTEGER NOT NULL, data TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS test_questions (test_id INTEGER NOT NULL, question_id INTEGER NOT NULL, data TEXT NOT NULL, PRIMARY KEY (test_id, question_id));
CREATE TABLE IF NOT EXISTS subsection_progress (user_id INTEGER NOT NULL, subsection_id INTEGER NOT NULL, data TEXT NOT NULL, PRIMARY KEY (user_id, subsection_id));
CREATE TABLE IF NOT EXISTS section_progress (user_id INTEGER NOT NULL, section_id INTEGER NOT NULL, data TEXT NOT NULL, PRIMARY KEY (user_id, section_id));
CREATE TABLE IF NOT EXISTS topic_progress (user_id INTEGER NOT NULL, topic_id INTEGER NOT NULL, data TEXT NOT NULL, PRIMARY KEY (user_id, topic_id));
CREATE TABLE IF NOT EXISTS attempts (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL, test_id INTEGER NOT NULL, status TEXT NOT NULL, data TEXT NOT NULL);
CREATE INDEX IF NOT EXISTS idx_attempts_user_test_status ON attempts (test_id, user_id, status);
";

/// A SQLite-backed gateway, opened from a file path or `:memory:`.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
}

impl SqliteGateway {
    /// Opens (creating if needed) the database at `path` and applies the schema.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::internal().with_context("opening sqlite database").with_source(e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::internal().with_context("applying sqlite schema").with_source(e))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn sql_err(e: rusqlite::Error) -> Error {
        Error::internal().with_context("sqlite operation failed").with_source(e)
    }

    fn json_err(e: serde_json::Error) -> Error {
        Error::internal().with_context("json (de)serialization failed").with_source(e)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(SqliteGateway::json_err)
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(SqliteGateway::json_err)
}

impl PersistenceGateway for SqliteGateway {
    fn get_topic(&self, id: TopicId) -> BoxFuture<'_, Result<Topic>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text: Option<String> = conn
                .query_row("SELECT data FROM topics WHERE id = ?1", params![id.get()], |r| r.get(0))
                .optional()
                .map_err(Self::sql_err)?;
            from_json(&text.ok_or_else(Error::not_found)?)
        })
    }

    fn insert_topic(&self, mut topic: Topic) -> BoxFuture<'_, Result<Topic>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            if topic.id.get() == 0 {
                let next: i64 = conn
                    .query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM topics", [], |r| r.get(0))
                    .map_err(Self::sql_err)?;
                topic.id = TopicId::new(next);
            }
            let text = to_json(&topic)?;
            conn.execute(
                "INSERT INTO topics (id, archived, data) VALUES (?1, ?2, ?3)",
                params![topic.id.get(), topic.audit.is_archived as i64, text],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::duplicate()
                }
                other => Self::sql_err(other),
            })?;
            Ok(topic)
        })
    }

    fn update_topic(&self, topic: Topic) -> BoxFuture<'_, Result<Topic>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text = to_json(&topic)?;
            let n = conn
                .execute(
                    "UPDATE topics SET archived = ?2, data = ?3 WHERE id = ?1",
                    params![topic.id.get(), topic.audit.is_archived as i64, text],
                )
                .map_err(Self::sql_err)?;
            if n == 0 {
                return Err(Error::not_found());
            }
            Ok(topic)
        })
    }

    fn archive_topic(&self, id: TopicId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let topic = self.get_topic(id).await?;
            let mut topic = topic;
            topic.audit.is_archived = true;
            topic.audit.updated_at = Utc::now();
            self.update_topic(topic).await.map(|_| ())
        })
    }

    fn delete_topic(&self, id: TopicId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let topic = self.get_topic(id).await?;
            if !topic.audit.is_archived {
                return Err(Error::archive_first());
            }
            let conn = self.conn.lock();
            conn.execute("DELETE FROM topics WHERE id = ?1", params![id.get()])
                .map_err(Self::sql_err)?;
            Ok(())
        })
    }

    fn get_section(&self, id: SectionId) -> BoxFuture<'_, Result<Section>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text: Option<String> = conn
                .query_row("SELECT data FROM sections WHERE id = ?1", params![id.get()], |r| r.get(0))
                .optional()
                .map_err(Self::sql_err)?;
            from_json(&text.ok_or_else(Error::not_found)?)
        })
    }

    fn list_sections_by_topic(&self, topic: TopicId) -> BoxFuture<'_, Result<Vec<Section>>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare("SELECT data FROM sections WHERE topic_id = ?1 AND archived = 0")
                .map_err(Self::sql_err)?;
            let rows = stmt
                .query_map(params![topic.get()], |r| r.get::<_, String>(0))
                .map_err(Self::sql_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(from_json::<Section>(&row.map_err(Self::sql_err)?)?);
            }
            out.sort_by_key(|s| (s.order, s.id));
            Ok(out)
        })
    }

    fn insert_section(&self, mut section: Section) -> BoxFuture<'_, Result<Section>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            if section.id.get() == 0 {
                let next: i64 = conn
                    .query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM sections", [], |r| r.get(0))
                    .map_err(Self::sql_err)?;
                section.id = SectionId::new(next);
            }
            let text = to_json(&section)?;
            conn.execute(
                "INSERT INTO sections (id, topic_id, archived, data) VALUES (?1, ?2, ?3, ?4)",
                params![section.id.get(), section.topic_id.get(), section.audit.is_archived as i64, text],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::duplicate()
                }
                other => Self::sql_err(other),
            })?;
            Ok(section)
        })
    }

    fn update_section(&self, section: Section) -> BoxFuture<'_, Result<Section>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text = to_json(&section)?;
            let n = conn
                .execute(
                    "UPDATE sections SET topic_id = ?2, archived = ?3, data = ?4 WHERE id = ?1",
                    params![section.id.get(), section.topic_id.get(), section.audit.is_archived as i64, text],
                )
                .map_err(Self::sql_err)?;
            if n == 0 {
                return Err(Error::not_found());
            }
            Ok(section)
        })
    }

    fn archive_section(&self, id: SectionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut section = self.get_section(id).await?;
            section.audit.is_archived = true;
            section.audit.updated_at = Utc::now();
            self.update_section(section).await.map(|_| ())
        })
    }

    fn delete_section(&self, id: SectionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let section = self.get_section(id).await?;
            if !section.audit.is_archived {
                return Err(Error::archive_first());
            }
            let conn = self.conn.lock();
            conn.execute("DELETE FROM sections WHERE id = ?1", params![id.get()])
                .map_err(Self::sql_err)?;
            Ok(())
        })
    }

    fn get_subsection(&self, id: SubsectionId) -> BoxFuture<'_, Result<Subsection>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text: Option<String> = conn
                .query_row("SELECT data FROM subsections WHERE id = ?1", params![id.get()], |r| r.get(0))
                .optional()
                .map_err(Self::sql_err)?;
            from_json(&text.ok_or_else(Error::not_found)?)
        })
    }

    fn list_subsections_by_section(&self, section: SectionId) -> BoxFuture<'_, Result<Vec<Subsection>>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare("SELECT data FROM subsections WHERE section_id = ?1 AND archived = 0")
                .map_err(Self::sql_err)?;
            let rows = stmt
                .query_map(params![section.get()], |r| r.get::<_, String>(0))
                .map_err(Self::sql_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(from_json::<Subsection>(&row.map_err(Self::sql_err)?)?);
            }
            out.sort_by_key(|s| (s.order, s.id));
            Ok(out)
        })
    }

    fn insert_subsection(&self, mut subsection: Subsection) -> BoxFuture<'_, Result<Subsection>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            if subsection.id.get() == 0 {
                let next: i64 = conn
                    .query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM subsections", [], |r| r.get(0))
                    .map_err(Self::sql_err)?;
                subsection.id = SubsectionId::new(next);
            }
            let text = to_json(&subsection)?;
            conn.execute(
                "INSERT INTO subsections (id, section_id, archived, data) VALUES (?1, ?2, ?3, ?4)",
                params![subsection.id.get(), subsection.section_id.get(), subsection.audit.is_archived as i64, text],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::duplicate()
                }
                other => Self::sql_err(other),
            })?;
            Ok(subsection)
        })
    }

    fn update_subsection(&self, subsection: Subsection) -> BoxFuture<'_, Result<Subsection>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text = to_json(&subsection)?;
            let n = conn
                .execute(
                    "UPDATE subsections SET section_id = ?2, archived = ?3, data = ?4 WHERE id = ?1",
                    params![subsection.id.get(), subsection.section_id.get(), subsection.audit.is_archived as i64, text],
                )
                .map_err(Self::sql_err)?;
            if n == 0 {
                return Err(Error::not_found());
            }
            Ok(subsection)
        })
    }

    fn archive_subsection(&self, id: SubsectionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut sub = self.get_subsection(id).await?;
            sub.audit.is_archived = true;
            sub.audit.updated_at = Utc::now();
            self.update_subsection(sub).await.map(|_| ())
        })
    }

    fn delete_subsection(&self, id: SubsectionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let sub = self.get_subsection(id).await?;
            if !sub.audit.is_archived {
                return Err(Error::archive_first());
            }
            let conn = self.conn.lock();
            conn.execute("DELETE FROM subsections WHERE id = ?1", params![id.get()])
                .map_err(Self::sql_err)?;
            Ok(())
        })
    }

    fn get_question(&self, id: QuestionId) -> BoxFuture<'_, Result<Question>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text: Option<String> = conn
                .query_row("SELECT data FROM questions WHERE id = ?1", params![id.get()], |r| r.get(0))
                .optional()
                .map_err(Self::sql_err)?;
            from_json(&text.ok_or_else(Error::not_found)?)
        })
    }

    fn list_questions_by_topic(&self, topic: TopicId) -> BoxFuture<'_, Result<Vec<Question>>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare("SELECT data FROM questions WHERE topic_id = ?1 AND archived = 0")
                .map_err(Self::sql_err)?;
            let rows = stmt
                .query_map(params![topic.get()], |r| r.get::<_, String>(0))
                .map_err(Self::sql_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(from_json::<Question>(&row.map_err(Self::sql_err)?)?);
            }
            Ok(out)
        })
    }

    fn insert_question(&self, mut question: Question) -> BoxFuture<'_, Result<Question>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            if question.id.get() == 0 {
                let next: i64 = conn
                    .query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM questions", [], |r| r.get(0))
                    .map_err(Self::sql_err)?;
                question.id = QuestionId::new(next);
            }
            let text = to_json(&question)?;
            conn.execute(
                "INSERT INTO questions (id, topic_id, archived, data) VALUES (?1, ?2, ?3, ?4)",
                params![question.id.get(), question.topic_id.get(), question.audit.is_archived as i64, text],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::duplicate()
                }
                other => Self::sql_err(other),
            })?;
            Ok(question)
        })
    }

    fn update_question(&self, question: Question) -> BoxFuture<'_, Result<Question>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text = to_json(&question)?;
            let n = conn
                .execute(
                    "UPDATE questions SET topic_id = ?2, archived = ?3, data = ?4 WHERE id = ?1",
                    params![question.id.get(), question.topic_id.get(), question.audit.is_archived as i64, text],
                )
                .map_err(Self::sql_err)?;
            if n == 0 {
                return Err(Error::not_found());
            }
            Ok(question)
        })
    }

    fn archive_question(&self, id: QuestionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut q = self.get_question(id).await?;
            q.audit.is_archived = true;
            q.audit.updated_at = Utc::now();
            self.update_question(q).await.map(|_| ())
        })
    }

    fn delete_question(&self, id: QuestionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let q = self.get_question(id).await?;
            if !q.audit.is_archived {
                return Err(Error::archive_first());
            }
            let conn = self.conn.lock();
            conn.execute("DELETE FROM questions WHERE id = ?1", params![id.get()])
                .map_err(Self::sql_err)?;
            Ok(())
        })
    }

    fn get_test(&self, id: TestId) -> BoxFuture<'_, Result<Test>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text: Option<String> = conn
                .query_row("SELECT data FROM tests WHERE id = ?1", params![id.get()], |r| r.get(0))
                .optional()
                .map_err(Self::sql_err)?;
            from_json(&text.ok_or_else(Error::not_found)?)
        })
    }

    fn list_tests_by_section(&self, section: SectionId) -> BoxFuture<'_, Result<Vec<Test>>> {
        Box::pin(async move {
            let tests = self.all_tests()?;
            Ok(tests
                .into_iter()
                .filter(|t| t.section_scope() == Some(section) && !t.audit.is_archived)
                .collect())
        })
    }

    fn list_tests_by_topic(&self, topic: TopicId) -> BoxFuture<'_, Result<Vec<Test>>> {
        Box::pin(async move {
            let tests = self.all_tests()?;
            Ok(tests
                .into_iter()
                .filter(|t| t.topic_scope() == Some(topic) && !t.audit.is_archived)
                .collect())
        })
    }

    fn insert_test(&self, mut test: Test) -> BoxFuture<'_, Result<Test>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            if test.id.get() == 0 {
                let next: i64 = conn
                    .query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM tests", [], |r| r.get(0))
                    .map_err(Self::sql_err)?;
                test.id = TestId::new(next);
            }
            let text = to_json(&test)?;
            conn.execute(
                "INSERT INTO tests (id, archived, data) VALUES (?1, ?2, ?3)",
                params![test.id.get(), test.audit.is_archived as i64, text],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::duplicate()
                }
                other => Self::sql_err(other),
            })?;
            Ok(test)
        })
    }

    fn update_test(&self, test: Test) -> BoxFuture<'_, Result<Test>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text = to_json(&test)?;
            let n = conn
                .execute(
                    "UPDATE tests SET archived = ?2, data = ?3 WHERE id = ?1",
                    params![test.id.get(), test.audit.is_archived as i64, text],
                )
                .map_err(Self::sql_err)?;
            if n == 0 {
                return Err(Error::not_found());
            }
            Ok(test)
        })
    }

    fn archive_test(&self, id: TestId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut test = self.get_test(id).await?;
            test.audit.is_archived = true;
            test.audit.updated_at = Utc::now();
            self.update_test(test).await?;

            let linked = self.list_test_questions(id).await?;
            for link in linked {
                let mut question = self.get_question(link.question_id).await?;
                question.audit.is_archived = true;
                question.audit.updated_at = Utc::now();
                self.update_question(question).await?;
            }
            Ok(())
        })
    }

    fn delete_test(&self, id: TestId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let test = self.get_test(id).await?;
            if !test.audit.is_archived {
                return Err(Error::archive_first());
            }
            let conn = self.conn.lock();
            conn.execute("DELETE FROM tests WHERE id = ?1", params![id.get()])
                .map_err(Self::sql_err)?;
            conn.execute("DELETE FROM test_questions WHERE test_id = ?1", params![id.get()])
                .map_err(Self::sql_err)?;
            Ok(())
        })
    }

    fn list_test_questions(&self, test: TestId) -> BoxFuture<'_, Result<Vec<TestQuestion>>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare("SELECT data FROM test_questions WHERE test_id = ?1")
                .map_err(Self::sql_err)?;
            let rows = stmt
                .query_map(params![test.get()], |r| r.get::<_, String>(0))
                .map_err(Self::sql_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(from_json::<TestQuestion>(&row.map_err(Self::sql_err)?)?);
            }
            Ok(out)
        })
    }

    fn add_test_question(&self, link: TestQuestion) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text = to_json(&link)?;
            conn.execute(
                "INSERT INTO test_questions (test_id, question_id, data) VALUES (?1, ?2, ?3)",
                params![link.test_id.get(), link.question_id.get(), text],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Error::duplicate()
                }
                other => Self::sql_err(other),
            })?;
            Ok(())
        })
    }

    fn remove_test_question(&self, test: TestId, question: QuestionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let n = conn
                .execute(
                    "DELETE FROM test_questions WHERE test_id = ?1 AND question_id = ?2",
                    params![test.get(), question.get()],
                )
                .map_err(Self::sql_err)?;
            if n == 0 {
                return Err(Error::not_found());
            }
            Ok(())
        })
    }

    fn get_subsection_progress(
        &self,
        user: UserId,
        subsection: SubsectionId,
    ) -> BoxFuture<'_, Result<Option<SubsectionProgress>>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text: Option<String> = conn
                .query_row(
                    "SELECT data FROM subsection_progress WHERE user_id = ?1 AND subsection_id = ?2",
                    params![user.get(), subsection.get()],
                    |r| r.get(0),
                )
                .optional()
                .map_err(Self::sql_err)?;
            text.map(|t| from_json(&t)).transpose()
        })
    }

    fn list_subsection_progress_for_section(
        &self,
        user: UserId,
        section: SectionId,
    ) -> BoxFuture<'_, Result<Vec<SubsectionProgress>>> {
        Box::pin(async move {
            let sub_ids: Vec<SubsectionId> =
                self.list_subsections_by_section(section).await?.iter().map(|s| s.id).collect();
            let mut out = Vec::new();
            for sid in sub_ids {
                if let Some(p) = self.get_subsection_progress(user, sid).await? {
                    out.push(p);
                }
            }
            Ok(out)
        })
    }

    fn list_subsection_progress_for_user(&self, user: UserId) -> BoxFuture<'_, Result<Vec<SubsectionProgress>>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare("SELECT data FROM subsection_progress WHERE user_id = ?1")
                .map_err(Self::sql_err)?;
            let rows = stmt
                .query_map(params![user.get()], |r| r.get::<_, String>(0))
                .map_err(Self::sql_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(from_json::<SubsectionProgress>(&row.map_err(Self::sql_err)?)?);
            }
            Ok(out)
        })
    }

    fn upsert_subsection_progress(
        &self,
        progress: SubsectionProgress,
    ) -> BoxFuture<'_, Result<SubsectionProgress>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text = to_json(&progress)?;
            conn.execute(
                "INSERT INTO subsection_progress (user_id, subsection_id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, subsection_id) DO UPDATE SET data = excluded.data",
                params![progress.user_id.get(), progress.subsection_id.get(), text],
            )
            .map_err(Self::sql_err)?;
            Ok(progress)
        })
    }

    fn get_section_progress(
        &self,
        user: UserId,
        section: SectionId,
    ) -> BoxFuture<'_, Result<Option<SectionProgress>>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text: Option<String> = conn
                .query_row(
                    "SELECT data FROM section_progress WHERE user_id = ?1 AND section_id = ?2",
                    params![user.get(), section.get()],
                    |r| r.get(0),
                )
                .optional()
                .map_err(Self::sql_err)?;
            text.map(|t| from_json(&t)).transpose()
        })
    }

    fn list_section_progress_for_topic(
        &self,
        user: UserId,
        topic: TopicId,
    ) -> BoxFuture<'_, Result<Vec<SectionProgress>>> {
        Box::pin(async move {
            let section_ids: Vec<SectionId> =
                self.list_sections_by_topic(topic).await?.iter().map(|s| s.id).collect();
            let mut out = Vec::new();
            for sid in section_ids {
                if let Some(p) = self.get_section_progress(user, sid).await? {
                    out.push(p);
                }
            }
            Ok(out)
        })
    }

    fn upsert_section_progress(&self, progress: SectionProgress) -> BoxFuture<'_, Result<SectionProgress>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text = to_json(&progress)?;
            conn.execute(
                "INSERT INTO section_progress (user_id, section_id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, section_id) DO UPDATE SET data = excluded.data",
                params![progress.user_id.get(), progress.section_id.get(), text],
            )
            .map_err(Self::sql_err)?;
            Ok(progress)
        })
    }

    fn get_topic_progress(&self, user: UserId, topic: TopicId) -> BoxFuture<'_, Result<Option<TopicProgress>>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text: Option<String> = conn
                .query_row(
                    "SELECT data FROM topic_progress WHERE user_id = ?1 AND topic_id = ?2",
                    params![user.get(), topic.get()],
                    |r| r.get(0),
                )
                .optional()
                .map_err(Self::sql_err)?;
            text.map(|t| from_json(&t)).transpose()
        })
    }

    fn upsert_topic_progress(&self, progress: TopicProgress) -> BoxFuture<'_, Result<TopicProgress>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text = to_json(&progress)?;
            conn.execute(
                "INSERT INTO topic_progress (user_id, topic_id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, topic_id) DO UPDATE SET data = excluded.data",
                params![progress.user_id.get(), progress.topic_id.get(), text],
            )
            .map_err(Self::sql_err)?;
            Ok(progress)
        })
    }

    fn get_attempt(&self, id: AttemptId) -> BoxFuture<'_, Result<TestAttempt>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text: Option<String> = conn
                .query_row("SELECT data FROM attempts WHERE id = ?1", params![id.get()], |r| r.get(0))
                .optional()
                .map_err(Self::sql_err)?;
            from_json(&text.ok_or_else(Error::not_found)?)
        })
    }

    fn get_in_progress_attempt(&self, user: UserId, test: TestId) -> BoxFuture<'_, Result<Option<TestAttempt>>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text: Option<String> = conn
                .query_row(
                    "SELECT data FROM attempts WHERE user_id = ?1 AND test_id = ?2 AND status = 'in_progress'",
                    params![user.get(), test.get()],
                    |r| r.get(0),
                )
                .optional()
                .map_err(Self::sql_err)?;
            text.map(|t| from_json(&t)).transpose()
        })
    }

    fn list_in_progress_attempts_for_user(&self, user: UserId) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            Ok(self.in_progress_attempts()?.into_iter().filter(|a| a.user_id == user).collect())
        })
    }

    fn count_non_expired_attempts(&self, user: UserId, test: TestId) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM attempts WHERE user_id = ?1 AND test_id = ?2 AND status != 'expired'",
                    params![user.get(), test.get()],
                    |r| r.get(0),
                )
                .map_err(Self::sql_err)?;
            Ok(n as u32)
        })
    }

    fn list_attempts_for_user_test(&self, user: UserId, test: TestId) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare("SELECT data FROM attempts WHERE user_id = ?1 AND test_id = ?2")
                .map_err(Self::sql_err)?;
            let rows = stmt
                .query_map(params![user.get(), test.get()], |r| r.get::<_, String>(0))
                .map_err(Self::sql_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(from_json::<TestAttempt>(&row.map_err(Self::sql_err)?)?);
            }
            out.sort_by_key(|a| a.attempt_number);
            Ok(out)
        })
    }

    fn best_completed_score(&self, user: UserId, test: TestId) -> BoxFuture<'_, Result<Option<f64>>> {
        Box::pin(async move {
            let attempts = self.list_attempts_for_user_test(user, test).await?;
            Ok(attempts
                .into_iter()
                .filter(|a| a.status == AttemptStatus::Completed)
                .filter_map(|a| a.score)
                .fold(None, |best: Option<f64>, score| Some(best.map_or(score, |b| b.max(score)))))
        })
    }

    fn insert_attempt_if_none_in_progress(&self, mut attempt: TestAttempt) -> BoxFuture<'_, Result<TestAttempt>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let existing: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM attempts WHERE user_id = ?1 AND test_id = ?2 AND status = 'in_progress'",
                    params![attempt.user_id.get(), attempt.test_id.get()],
                    |r| r.get(0),
                )
                .map_err(Self::sql_err)?;
            if existing > 0 {
                return Err(Error::already_in_progress());
            }
            if attempt.id.get() == 0 {
                let next: i64 = conn
                    .query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM attempts", [], |r| r.get(0))
                    .map_err(Self::sql_err)?;
                attempt.id = AttemptId::new(next);
            }
            let text = to_json(&attempt)?;
            conn.execute(
                "INSERT INTO attempts (id, user_id, test_id, status, data) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![attempt.id.get(), attempt.user_id.get(), attempt.test_id.get(), status_text(attempt.status), text],
            )
            .map_err(Self::sql_err)?;
            Ok(attempt)
        })
    }

    fn update_attempt(&self, attempt: TestAttempt) -> BoxFuture<'_, Result<TestAttempt>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let text = to_json(&attempt)?;
            let n = conn
                .execute(
                    "UPDATE attempts SET status = ?2, data = ?3 WHERE id = ?1",
                    params![attempt.id.get(), status_text(attempt.status), text],
                )
                .map_err(Self::sql_err)?;
            if n == 0 {
                return Err(Error::not_found());
            }
            Ok(attempt)
        })
    }

    fn delete_attempt(&self, id: AttemptId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.conn.lock();
            let n = conn
                .execute("DELETE FROM attempts WHERE id = ?1", params![id.get()])
                .map_err(Self::sql_err)?;
            if n == 0 {
                return Err(Error::not_found());
            }
            Ok(())
        })
    }

    fn list_overdue_in_progress(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            Ok(self
                .in_progress_attempts()?
                .into_iter()
                .filter(|a| a.expires_at.is_some_and(|exp| exp < now))
                .collect())
        })
    }

    fn list_near_deadline(
        &self,
        now: DateTime<Utc>,
        window: chrono::Duration,
        max_extends: u32,
    ) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            let deadline = now + window;
            Ok(self
                .in_progress_attempts()?
                .into_iter()
                .filter(|a| {
                    a.auto_extend_count < max_extends
                        && a.expires_at.is_some_and(|exp| exp >= now && exp <= deadline)
                })
                .collect())
        })
    }

    fn list_stale_unstarted(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            Ok(self
                .in_progress_attempts()?
                .into_iter()
                .filter(|a| a.last_activity_at == a.started_at && a.started_at < cutoff)
                .collect())
        })
    }

    fn list_inactive_in_progress(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<Vec<TestAttempt>>> {
        Box::pin(async move {
            Ok(self
                .in_progress_attempts()?
                .into_iter()
                .filter(|a| a.last_activity_at != a.started_at && a.last_activity_at < cutoff)
                .collect())
        })
    }
}

fn status_text(status: AttemptStatus) -> &'static str {
    match status {
        AttemptStatus::InProgress => "in_progress",
        AttemptStatus::Completed => "completed",
        AttemptStatus::Expired => "expired",
    }
}

impl SqliteGateway {
    fn all_tests(&self) -> Result<Vec<Test>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT data FROM tests").map_err(Self::sql_err)?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0)).map_err(Self::sql_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json::<Test>(&row.map_err(Self::sql_err)?)?);
        }
        Ok(out)
    }

    fn in_progress_attempts(&self) -> Result<Vec<TestAttempt>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT data FROM attempts WHERE status = 'in_progress'")
            .map_err(Self::sql_err)?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0)).map_err(Self::sql_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(from_json::<TestAttempt>(&row.map_err(Self::sql_err)?)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Audit;

    #[tokio::test]
    async fn open_creates_schema_and_round_trips_a_topic() {
        let gw = SqliteGateway::open(":memory:").unwrap();
        let topic = Topic {
            id: TopicId::new(0),
            title: "geometry".into(),
            description: None,
            category: None,
            image_path: None,
            creator_id: UserId::new(1),
            audit: Audit::new(Utc::now()),
        };
        let inserted = gw.insert_topic(topic).await.unwrap();
        let fetched = gw.get_topic(inserted.id).await.unwrap();
        assert_eq!(fetched.title, "geometry");
    }

    #[tokio::test]
    async fn delete_before_archive_fails() {
        let gw = SqliteGateway::open(":memory:").unwrap();
        let topic = gw
            .insert_topic(Topic {
                id: TopicId::new(0),
                title: "t".into(),
                description: None,
                category: None,
                image_path: None,
                creator_id: UserId::new(1),
                audit: Audit::new(Utc::now()),
            })
            .await
            .unwrap();
        let err = gw.delete_topic(topic.id).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ArchiveFirst);
    }
}
