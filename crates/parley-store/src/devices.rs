//! CRUD operations for [`Device`] records, plus the atomic primary-device
//! switch.

use rusqlite::{params, Connection, TransactionBehavior};

use parley_shared::types::{DeviceId, UserId};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{now, ts_col, ts_to_sql, uuid_col, Device};

const DEVICE_COLUMNS: &str =
    "id, user_id, device_name, device_info, is_primary, is_current, created_at, last_active";

impl Database {
    // ------------------------------------------------------------------
    // Create / read
    // ------------------------------------------------------------------

    /// Find the device of `user_id` with this (name, info) fingerprint and
    /// refresh it, or insert a new non-primary one. Returns the device and
    /// whether it was created.
    ///
    /// The lookup and the write share one IMMEDIATE transaction. The unique
    /// fingerprint index backs it up across connections: a violation means
    /// another login inserted the row first, and that row is refreshed.
    pub fn register_device(
        &mut self,
        user_id: UserId,
        device_name: &str,
        device_info: &str,
        is_current: bool,
    ) -> Result<(Device, bool)> {
        match self.register_device_tx(user_id, device_name, device_info, is_current) {
            Ok(registered) => Ok(registered),
            Err(e) if e.is_constraint_violation() => {
                tracing::debug!(user = %user_id, device_name, "device registered concurrently, rereading");
                let existing = self
                    .find_device_by_fingerprint(user_id, device_name, device_info)?
                    .ok_or(e)?;
                Ok((self.touch_device(existing.id, is_current)?, false))
            }
            Err(e) => Err(e),
        }
    }

    fn register_device_tx(
        &mut self,
        user_id: UserId,
        device_name: &str,
        device_info: &str,
        is_current: bool,
    ) -> Result<(Device, bool)> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let registered = match fingerprint_in(&tx, user_id, device_name, device_info)? {
            Some(existing) => (touch_in(&tx, existing.id, is_current)?, false),
            None => (
                insert_in(&tx, user_id, device_name, device_info, is_current)?,
                true,
            ),
        };
        tx.commit()?;
        Ok(registered)
    }

    pub fn get_device(&self, id: DeviceId) -> Result<Device> {
        device_in(self.conn(), id)
    }

    /// Look up a device of `user_id` by its (name, info) fingerprint.
    pub fn find_device_by_fingerprint(
        &self,
        user_id: UserId,
        device_name: &str,
        device_info: &str,
    ) -> Result<Option<Device>> {
        fingerprint_in(self.conn(), user_id, device_name, device_info)
    }

    /// All devices of a user: current first, then primary, then most
    /// recently active.
    pub fn list_devices(&self, user_id: UserId) -> Result<Vec<Device>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices
             WHERE user_id = ?1
             ORDER BY is_current DESC, is_primary DESC, last_active DESC"
        ))?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_device)?;

        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?);
        }
        Ok(devices)
    }

    pub fn primary_device(&self, user_id: UserId) -> Result<Option<Device>> {
        match self.conn().query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = ?1 AND is_primary = 1"),
            params![user_id.to_string()],
            row_to_device,
        ) {
            Ok(device) => Ok(Some(device)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Refresh `last_active` and set `is_current` on an existing device.
    pub fn touch_device(&self, id: DeviceId, is_current: bool) -> Result<Device> {
        touch_in(self.conn(), id, is_current)
    }

    /// Clear `is_current` on every device of `user_id` except `keep`.
    /// Returns the number of rows changed.
    pub fn clear_current_devices(&self, user_id: UserId, keep: Option<DeviceId>) -> Result<usize> {
        let keep = keep.map(|id| id.to_string()).unwrap_or_default();
        let affected = self.conn().execute(
            "UPDATE devices SET is_current = 0
             WHERE user_id = ?1 AND id != ?2 AND is_current = 1",
            params![user_id.to_string(), keep],
        )?;
        Ok(affected)
    }

    /// Make `device_id` the single primary device of `user_id`.
    ///
    /// Runs in one IMMEDIATE transaction: verifies ownership, clears every
    /// primary flag of the user, then sets the target. Fails with
    /// [`StoreError::NotFound`] if the device does not belong to the user.
    pub fn set_primary_device(&mut self, user_id: UserId, device_id: DeviceId) -> Result<Device> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let owned: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM devices WHERE id = ?1 AND user_id = ?2)",
            params![device_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        if !owned {
            return Err(StoreError::NotFound);
        }

        tx.execute(
            "UPDATE devices SET is_primary = 0 WHERE user_id = ?1 AND is_primary = 1",
            params![user_id.to_string()],
        )?;
        tx.execute(
            "UPDATE devices SET is_primary = 1 WHERE id = ?1",
            params![device_id.to_string()],
        )?;
        tx.commit()?;

        tracing::debug!(user = %user_id, device = %device_id, "primary device changed");
        self.get_device(device_id)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a device owned by `user_id`. Returns `false` when nothing
    /// matched (unknown id or another user's device).
    pub fn delete_device(&self, user_id: UserId, device_id: DeviceId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM devices WHERE id = ?1 AND user_id = ?2",
            params![device_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn insert_in(
    conn: &Connection,
    user_id: UserId,
    device_name: &str,
    device_info: &str,
    is_current: bool,
) -> Result<Device> {
    let ts = now();
    let device = Device {
        id: DeviceId::new(),
        user_id,
        device_name: device_name.to_string(),
        device_info: device_info.to_string(),
        is_primary: false,
        is_current,
        created_at: ts,
        last_active: ts,
    };

    conn.execute(
        "INSERT INTO devices (id, user_id, device_name, device_info, is_primary, is_current, created_at, last_active)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)",
        params![
            device.id.to_string(),
            user_id.to_string(),
            device.device_name,
            device.device_info,
            is_current,
            ts_to_sql(&ts),
        ],
    )?;

    Ok(device)
}

fn device_in(conn: &Connection, id: DeviceId) -> Result<Device> {
    conn.query_row(
        &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
        params![id.to_string()],
        row_to_device,
    )
    .map_err(not_found)
}

fn fingerprint_in(
    conn: &Connection,
    user_id: UserId,
    device_name: &str,
    device_info: &str,
) -> Result<Option<Device>> {
    match conn.query_row(
        &format!(
            "SELECT {DEVICE_COLUMNS} FROM devices
             WHERE user_id = ?1 AND device_name = ?2 AND device_info = ?3"
        ),
        params![user_id.to_string(), device_name, device_info],
        row_to_device,
    ) {
        Ok(device) => Ok(Some(device)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn touch_in(conn: &Connection, id: DeviceId, is_current: bool) -> Result<Device> {
    let affected = conn.execute(
        "UPDATE devices SET last_active = ?2, is_current = ?3 WHERE id = ?1",
        params![id.to_string(), ts_to_sql(&now()), is_current],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    device_in(conn, id)
}

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: DeviceId(uuid_col(row, 0)?),
        user_id: UserId(uuid_col(row, 1)?),
        device_name: row.get(2)?,
        device_info: row.get(3)?,
        is_primary: row.get(4)?,
        is_current: row.get(5)?,
        created_at: ts_col(row, 6)?,
        last_active: ts_col(row, 7)?,
    })
}
