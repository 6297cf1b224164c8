use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{Availability, Driver};

#[derive(Debug, Clone)]
pub struct NewDriver {
    pub name: String,
    pub phone: String,
    pub restaurant_id: Option<Uuid>,
}

/// Known drivers and their availability. Each driver sits behind its own
/// lock; `busy` is only ever entered through dispatch.
pub struct DriverRegistry {
    drivers: DashMap<Uuid, Arc<Mutex<Driver>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn contains(&self, driver_id: Uuid) -> bool {
        self.drivers.contains_key(&driver_id)
    }

    pub fn register(&self, new_driver: NewDriver) -> Result<Driver, AppError> {
        if new_driver.name.trim().is_empty() {
            return Err(AppError::Validation("name cannot be empty".to_string()));
        }
        if new_driver.phone.trim().is_empty() {
            return Err(AppError::Validation("phone cannot be empty".to_string()));
        }

        let now = Utc::now();
        let driver = Driver {
            id: Uuid::new_v4(),
            name: new_driver.name.trim().to_string(),
            phone: new_driver.phone.trim().to_string(),
            restaurant_id: new_driver.restaurant_id,
            availability: Availability::Available,
            current_order: None,
            available_since: Some(now),
            active: true,
            created_at: now,
            updated_at: now,
        };

        self.drivers
            .insert(driver.id, Arc::new(Mutex::new(driver.clone())));
        info!(driver_id = %driver.id, "driver registered");

        Ok(driver)
    }

    pub async fn get(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        let handle = self.handle(driver_id)?;
        let driver = handle.lock().await;
        Ok(driver.clone())
    }

    pub(crate) async fn lock(&self, driver_id: Uuid) -> Result<OwnedMutexGuard<Driver>, AppError> {
        let handle = self.handle(driver_id)?;
        Ok(handle.lock_owned().await)
    }

    pub async fn list(&self) -> Vec<Driver> {
        let mut drivers = Vec::with_capacity(self.drivers.len());
        for handle in self.handles() {
            drivers.push(handle.lock().await.clone());
        }
        drivers.sort_by_key(|driver| driver.id);
        drivers
    }

    /// Assignable drivers that may serve `restaurant_id`: unaffiliated ones
    /// plus those affiliated with that restaurant.
    pub async fn list_available(&self, restaurant_id: Uuid) -> Vec<Driver> {
        let mut drivers = self.list().await;
        drivers.retain(|driver| driver.is_assignable() && driver.serves(restaurant_id));
        drivers
    }

    /// Driver-initiated toggle between `available` and `unavailable`.
    pub async fn set_availability(
        &self,
        driver_id: Uuid,
        availability: Availability,
    ) -> Result<Driver, AppError> {
        if availability == Availability::Busy {
            return Err(AppError::Validation(
                "busy is set by dispatch, not by the driver".to_string(),
            ));
        }

        let mut driver = self.lock(driver_id).await?;
        if !driver.active {
            return Err(AppError::NotAvailable(format!(
                "driver {driver_id} is deactivated"
            )));
        }
        if let Some(order_id) = driver.current_order {
            return Err(AppError::Conflict(format!(
                "driver {driver_id} is delivering order {order_id}"
            )));
        }

        if driver.availability != availability {
            let now = Utc::now();
            driver.availability = availability;
            driver.available_since = (availability == Availability::Available).then_some(now);
            driver.updated_at = now;
            info!(driver_id = %driver_id, availability = ?availability, "driver availability changed");
        }

        Ok(driver.clone())
    }

    pub async fn deactivate(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        let mut driver = self.lock(driver_id).await?;
        if let Some(order_id) = driver.current_order {
            return Err(AppError::Conflict(format!(
                "driver {driver_id} is delivering order {order_id}"
            )));
        }

        if driver.active {
            driver.active = false;
            driver.availability = Availability::Unavailable;
            driver.available_since = None;
            driver.updated_at = Utc::now();
            info!(driver_id = %driver_id, "driver deactivated");
        }

        Ok(driver.clone())
    }

    fn handle(&self, driver_id: Uuid) -> Result<Arc<Mutex<Driver>>, AppError> {
        self.drivers
            .get(&driver_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))
    }

    fn handles(&self) -> Vec<Arc<Mutex<Driver>>> {
        self.drivers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
