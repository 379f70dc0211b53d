use crate::{PostgresStore, db_err, rows};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use simbay_core::error::StoreError;
use simbay_core::ids::{AttendanceId, CapacityHoldId, LeagueId, LeagueWeekId, TeamId, UserId};
use simbay_core::model::{
    CapacityHold, League, LeagueAttendance, LeagueParticipant, LeagueWeek, Team, TeamMember,
};
use simbay_core::status::AttendanceStatus;
use simbay_core::store::{LeagueStore, StoreResult};

/// Rounds averaged into a player's handicap
const HANDICAP_ROUNDS: i64 = 5;

#[async_trait]
impl LeagueStore for PostgresStore {
    async fn get_league(&self, id: LeagueId) -> StoreResult<Option<League>> {
        let row = sqlx::query("SELECT * FROM leagues WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::league).transpose()
    }

    async fn active_leagues(&self) -> StoreResult<Vec<League>> {
        let found = sqlx::query("SELECT * FROM leagues WHERE status = 'active' ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows::all(&found, rows::league)
    }

    async fn next_week(&self, league: LeagueId, from: NaiveDate) -> StoreResult<Option<LeagueWeek>> {
        let row = sqlx::query(
            r"
            SELECT * FROM league_weeks
            WHERE league_id = $1 AND date >= $2 AND status <> 'completed'
            ORDER BY date
            LIMIT 1
            ",
        )
        .bind(league.as_uuid())
        .bind(from)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(rows::week).transpose()
    }

    async fn weeks_with_unlocked_attendance(&self, league: LeagueId) -> StoreResult<Vec<LeagueWeek>> {
        let found = sqlx::query(
            r"
            SELECT w.* FROM league_weeks w
            WHERE w.league_id = $1
              AND EXISTS (
                  SELECT 1 FROM league_attendance a WHERE a.week_id = w.id AND NOT a.locked
              )
            ORDER BY w.date
            ",
        )
        .bind(league.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows::all(&found, rows::week)
    }

    async fn league_participants(&self, league: LeagueId) -> StoreResult<Vec<LeagueParticipant>> {
        let found = sqlx::query(
            r"
            SELECT p.user_id, u.email, p.team_id
            FROM league_participants p
            JOIN users u ON u.id = p.user_id
            WHERE p.league_id = $1
            ORDER BY u.email
            ",
        )
        .bind(league.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows::all(&found, rows::participant)
    }

    async fn attendance_for_week(&self, week: LeagueWeekId) -> StoreResult<Vec<LeagueAttendance>> {
        let found = sqlx::query("SELECT * FROM league_attendance WHERE week_id = $1 ORDER BY email")
            .bind(week.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows::all(&found, rows::attendance)
    }

    async fn insert_attendance_if_absent(
        &self,
        attendance: &LeagueAttendance,
    ) -> StoreResult<LeagueAttendance> {
        sqlx::query(
            r"
            INSERT INTO league_attendance (
                id, week_id, user_id, email, team_id, status, response_token,
                reminder_sent_at, locked
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (week_id, user_id) DO NOTHING
            ",
        )
        .bind(attendance.id.as_uuid())
        .bind(attendance.week_id.as_uuid())
        .bind(attendance.user_id.as_uuid())
        .bind(&attendance.email)
        .bind(attendance.team_id.map(|id| *id.as_uuid()))
        .bind(attendance.status.as_str())
        .bind(&attendance.response_token)
        .bind(attendance.reminder_sent_at)
        .bind(attendance.locked)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let row = sqlx::query("SELECT * FROM league_attendance WHERE week_id = $1 AND user_id = $2")
            .bind(attendance.week_id.as_uuid())
            .bind(attendance.user_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        rows::attendance(&row)
    }

    async fn mark_attendance_reminded(
        &self,
        id: AttendanceId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE league_attendance SET reminder_sent_at = $2
            WHERE id = $1 AND reminder_sent_at IS NULL
            ",
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn lock_attendance(&self, week: LeagueWeekId) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE league_attendance SET locked = TRUE WHERE week_id = $1 AND NOT locked",
        )
        .bind(week.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn attendance_by_token(&self, token: &str) -> StoreResult<Option<LeagueAttendance>> {
        let row = sqlx::query("SELECT * FROM league_attendance WHERE response_token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::attendance).transpose()
    }

    async fn respond_attendance(
        &self,
        id: AttendanceId,
        expected: AttendanceStatus,
        next: AttendanceStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE league_attendance SET status = $3
            WHERE id = $1 AND status = $2 AND NOT locked
            ",
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn capacity_hold_for_week(&self, week: LeagueWeekId) -> StoreResult<Option<CapacityHold>> {
        let row = sqlx::query("SELECT * FROM capacity_holds WHERE week_id = $1")
            .bind(week.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(rows::capacity_hold).transpose()
    }

    async fn update_capacity_hold_bays(
        &self,
        id: CapacityHoldId,
        expected: u32,
        bay_count: u32,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE capacity_holds SET bay_count = $3 WHERE id = $1 AND bay_count = $2",
        )
        .bind(id.as_uuid())
        .bind(rows::to_i32(expected)?)
        .bind(rows::to_i32(bay_count)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn teams_with_unpaid_members(&self, league: LeagueId) -> StoreResult<Vec<Team>> {
        let found = sqlx::query(
            r"
            SELECT t.* FROM teams t
            WHERE t.league_id = $1
              AND t.status = 'active'
              AND EXISTS (SELECT 1 FROM team_members m WHERE m.team_id = t.id AND NOT m.paid)
            ORDER BY t.name
            ",
        )
        .bind(league.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows::all(&found, rows::team)
    }

    async fn disqualify_team(&self, team: TeamId) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE teams SET status = 'disqualified' WHERE id = $1 AND status = 'active'",
        )
        .bind(team.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn disqualified_teams_awaiting_refund(&self, league: LeagueId) -> StoreResult<Vec<Team>> {
        let found = sqlx::query(
            r"
            SELECT t.* FROM teams t
            WHERE t.league_id = $1
              AND t.status = 'disqualified'
              AND EXISTS (
                  SELECT 1 FROM team_members m
                  WHERE m.team_id = t.id AND m.paid AND NOT m.refunded
              )
            ORDER BY t.name
            ",
        )
        .bind(league.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows::all(&found, rows::team)
    }

    async fn paid_members(&self, team: TeamId) -> StoreResult<Vec<TeamMember>> {
        let found = sqlx::query(
            "SELECT * FROM team_members WHERE team_id = $1 AND paid AND NOT refunded",
        )
        .bind(team.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows::all(&found, rows::team_member)
    }

    async fn mark_member_refunded(&self, team: TeamId, user: UserId) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE team_members SET refunded = TRUE
            WHERE team_id = $1 AND user_id = $2 AND NOT refunded
            ",
        )
        .bind(team.as_uuid())
        .bind(user.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn recalculate_handicaps(&self, league: LeagueId) -> StoreResult<u32> {
        // average differential to par over each player's most recent rounds
        let result = sqlx::query(
            r"
            UPDATE league_participants p
            SET handicap = recent.handicap
            FROM (
                SELECT user_id, ROUND(AVG(gross_score - course_par)::numeric, 1)::float8 AS handicap
                FROM (
                    SELECT s.user_id, s.gross_score, s.course_par,
                           ROW_NUMBER() OVER (PARTITION BY s.user_id ORDER BY w.date DESC, s.id DESC) AS n
                    FROM league_scores s
                    JOIN league_weeks w ON w.id = s.week_id
                    WHERE s.league_id = $1
                ) ranked
                WHERE n <= $2
                GROUP BY user_id
            ) recent
            WHERE p.league_id = $1 AND p.user_id = recent.user_id
            ",
        )
        .bind(league.as_uuid())
        .bind(HANDICAP_ROUNDS)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        u32::try_from(result.rows_affected())
            .map_err(|_| StoreError::Database("handicap update count out of range".to_string()))
    }
}
