use super::{parse_non_negative_i64, u64_to_sql_i64, SqliteStore};
use anyhow::{anyhow, Context, Result};
use promobot_core_types::UserRow;
use rusqlite::{params, OptionalExtension};

impl SqliteStore {
    pub fn upsert_user(&self, user: &UserRow) -> Result<()> {
        let lifetime = u64_to_sql_i64(user.lifetime_reward, "users.lifetime_reward")?;
        self.execute_with_retry(|conn| {
            conn.execute(
                "INSERT INTO users(user_id, platform_handle, wallet_address, lifetime_reward,
                                   platform_token, platform_token_secret)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id) DO UPDATE SET
                    platform_handle = excluded.platform_handle,
                    wallet_address = excluded.wallet_address,
                    platform_token = excluded.platform_token,
                    platform_token_secret = excluded.platform_token_secret",
                params![
                    &user.user_id,
                    &user.platform_handle,
                    &user.wallet_address,
                    lifetime,
                    &user.platform_token,
                    &user.platform_token_secret,
                ],
            )
        })
        .with_context(|| format!("failed to upsert user {}", user.user_id))?;
        Ok(())
    }

    pub fn user_by_id(&self, user_id: &str) -> Result<Option<UserRow>> {
        let raw = self
            .conn
            .query_row(
                "SELECT user_id, platform_handle, wallet_address, lifetime_reward,
                        platform_token, platform_token_secret
                 FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed querying user {}", user_id))?;
        let Some((user_id, handle, wallet, lifetime, token, secret)) = raw else {
            return Ok(None);
        };
        Ok(Some(UserRow {
            lifetime_reward: parse_non_negative_i64(lifetime, "users.lifetime_reward")?,
            user_id,
            platform_handle: handle,
            wallet_address: wallet,
            platform_token: token,
            platform_token_secret: secret,
        }))
    }

    pub fn add_lifetime_reward(&self, user_id: &str, amount: u64) -> Result<()> {
        let amount = u64_to_sql_i64(amount, "lifetime_reward delta")?;
        let changed = self
            .execute_with_retry(|conn| {
                conn.execute(
                    "UPDATE users SET lifetime_reward = lifetime_reward + ?1 WHERE user_id = ?2",
                    params![amount, user_id],
                )
            })
            .with_context(|| format!("failed adding lifetime reward for user {}", user_id))?;
        if changed == 0 {
            return Err(anyhow!("user not found: {}", user_id));
        }
        Ok(())
    }
}
