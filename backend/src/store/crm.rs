use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use atrium_shared::{
    Activity, Company, CompanyPatch, Contact, ContactPatch, NewActivity, NewReminder, Reminder, Segment, User,
};

use super::{CrmStore, StoreResult};

/// PostgreSQL-backed access to the CRM entities workflow actions touch.
#[derive(Clone)]
pub struct PgCrmStore {
    pool: PgPool,
}

impl PgCrmStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const CONTACT_COLUMNS: &str =
    "id, tenant_id, company_id, name, email, phone, status_id, assigned_to_id, created_at, updated_at";
const COMPANY_COLUMNS: &str = "id, tenant_id, name, email, phone, website, industry, status_id, \
     assigned_to_id, created_at, updated_at";
const REMINDER_COLUMNS: &str = "id, tenant_id, title, description, due_date, contact_id, company_id, \
     assigned_to_id, created_by_id, due_announced_at, created_at";

#[async_trait]
impl CrmStore for PgCrmStore {
    async fn get_contact(&self, tenant_id: Uuid, contact_id: Uuid) -> StoreResult<Option<Contact>> {
        Ok(sqlx::query_as::<_, Contact>(&format!(
            "SELECT {} FROM contacts WHERE id = $1 AND tenant_id = $2",
            CONTACT_COLUMNS
        ))
        .bind(contact_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_contact(
        &self,
        tenant_id: Uuid,
        contact_id: Uuid,
        patch: &ContactPatch,
    ) -> StoreResult<Option<Contact>> {
        Ok(sqlx::query_as::<_, Contact>(&format!(
            "UPDATE contacts SET \
                 name = COALESCE($3, name), \
                 email = COALESCE($4, email), \
                 phone = COALESCE($5, phone), \
                 status_id = COALESCE($6, status_id), \
                 assigned_to_id = COALESCE($7, assigned_to_id), \
                 updated_at = NOW() \
             WHERE id = $1 AND tenant_id = $2 \
             RETURNING {}",
            CONTACT_COLUMNS
        ))
        .bind(contact_id)
        .bind(tenant_id)
        .bind(&patch.name)
        .bind(&patch.email)
        .bind(&patch.phone)
        .bind(patch.status_id)
        .bind(patch.assigned_to_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_company(&self, tenant_id: Uuid, company_id: Uuid) -> StoreResult<Option<Company>> {
        Ok(sqlx::query_as::<_, Company>(&format!(
            "SELECT {} FROM companies WHERE id = $1 AND tenant_id = $2",
            COMPANY_COLUMNS
        ))
        .bind(company_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_company(
        &self,
        tenant_id: Uuid,
        company_id: Uuid,
        patch: &CompanyPatch,
    ) -> StoreResult<Option<Company>> {
        Ok(sqlx::query_as::<_, Company>(&format!(
            "UPDATE companies SET \
                 name = COALESCE($3, name), \
                 email = COALESCE($4, email), \
                 phone = COALESCE($5, phone), \
                 website = COALESCE($6, website), \
                 industry = COALESCE($7, industry), \
                 status_id = COALESCE($8, status_id), \
                 assigned_to_id = COALESCE($9, assigned_to_id), \
                 updated_at = NOW() \
             WHERE id = $1 AND tenant_id = $2 \
             RETURNING {}",
            COMPANY_COLUMNS
        ))
        .bind(company_id)
        .bind(tenant_id)
        .bind(&patch.name)
        .bind(&patch.email)
        .bind(&patch.phone)
        .bind(&patch.website)
        .bind(&patch.industry)
        .bind(patch.status_id)
        .bind(patch.assigned_to_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_activity(&self, activity: NewActivity) -> StoreResult<Activity> {
        Ok(sqlx::query_as::<_, Activity>(
            "INSERT INTO activities \
             (id, tenant_id, activity_type, subject, description, contact_id, company_id, created_by_id, due_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING id, tenant_id, activity_type, subject, description, contact_id, company_id, \
                       created_by_id, due_date, completed_at, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(activity.tenant_id)
        .bind(&activity.activity_type)
        .bind(&activity.subject)
        .bind(&activity.description)
        .bind(activity.contact_id)
        .bind(activity.company_id)
        .bind(activity.created_by_id)
        .bind(activity.due_date)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn create_reminder(&self, reminder: NewReminder) -> StoreResult<Reminder> {
        Ok(sqlx::query_as::<_, Reminder>(&format!(
            "INSERT INTO reminders \
             (id, tenant_id, title, description, due_date, contact_id, company_id, assigned_to_id, created_by_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {}",
            REMINDER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(reminder.tenant_id)
        .bind(&reminder.title)
        .bind(&reminder.description)
        .bind(reminder.due_date)
        .bind(reminder.contact_id)
        .bind(reminder.company_id)
        .bind(reminder.assigned_to_id)
        .bind(reminder.created_by_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn due_reminders(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Reminder>> {
        Ok(sqlx::query_as::<_, Reminder>(&format!(
            "SELECT {} FROM reminders \
             WHERE due_date <= $1 AND due_announced_at IS NULL \
             ORDER BY due_date LIMIT $2",
            REMINDER_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn mark_reminder_announced(&self, reminder_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE reminders SET due_announced_at = $2 WHERE id = $1 AND due_announced_at IS NULL",
        )
        .bind(reminder_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_segment(&self, tenant_id: Uuid, segment_id: Uuid) -> StoreResult<Option<Segment>> {
        Ok(sqlx::query_as::<_, Segment>(
            "SELECT id, tenant_id, name, contact_count, created_at FROM segments WHERE id = $1 AND tenant_id = $2",
        )
        .bind(segment_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn add_segment_member(&self, segment_id: Uuid, contact_id: Uuid) -> StoreResult<bool> {
        // xmax is 0 only on the row version a fresh INSERT wrote.
        let (inserted,): (bool,) = sqlx::query_as(
            "INSERT INTO contact_segments (contact_id, segment_id, is_manual, added_at) \
             VALUES ($1, $2, TRUE, NOW()) \
             ON CONFLICT (contact_id, segment_id) DO UPDATE SET is_manual = TRUE \
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(contact_id)
        .bind(segment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn remove_segment_member(&self, segment_id: Uuid, contact_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM contact_segments WHERE contact_id = $1 AND segment_id = $2")
            .bind(contact_id)
            .bind(segment_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn adjust_segment_count(&self, segment_id: Uuid, delta: i32) -> StoreResult<i32> {
        let (count,): (i32,) = sqlx::query_as(
            "UPDATE segments SET contact_count = GREATEST(contact_count + $2, 0) \
             WHERE id = $1 RETURNING contact_count",
        )
        .bind(segment_id)
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn get_user(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, tenant_id, name, email, is_active, created_at FROM users WHERE id = $1 AND tenant_id = $2",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}
