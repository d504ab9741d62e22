use crate::{
    config::CreditPackageConfig,
    error::{ApiError, Result},
};
use async_trait::async_trait;
use entity::sea_orm_active_enums::ItemType;
use sea_orm::{entity::*, query::*, DatabaseConnection};
use uuid::Uuid;

/// Server-side price of one purchasable item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedItem {
    pub item_type: ItemType,
    pub course_id: Option<Uuid>,
    pub section_id: Option<Uuid>,
    pub package_id: Option<String>,
    pub title: String,
    pub unit_price: i64,
}

impl PricedItem {
    /// Identifier as the client sent it
    pub fn item_id(&self) -> String {
        match self.item_type {
            ItemType::Course => self.course_id.map(|id| id.to_string()).unwrap_or_default(),
            ItemType::Section => self.section_id.map(|id| id.to_string()).unwrap_or_default(),
            ItemType::CreditPackage => self.package_id.clone().unwrap_or_default(),
        }
    }
}

/// Authoritative prices; client-supplied prices are never trusted
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn resolve(&self, item_type: ItemType, item_id: &str) -> Result<PricedItem>;

    fn credit_package(&self, package_id: &str) -> Option<CreditPackageConfig>;
}

/// Courses and sections from the catalog price view, credit packages from config
pub struct DbCatalog {
    db: DatabaseConnection,
    packages: Vec<CreditPackageConfig>,
}

impl DbCatalog {
    pub fn new(db: DatabaseConnection, packages: Vec<CreditPackageConfig>) -> Self {
        Self { db, packages }
    }
}

#[async_trait]
impl CatalogLookup for DbCatalog {
    async fn resolve(&self, item_type: ItemType, item_id: &str) -> Result<PricedItem> {
        if item_type == ItemType::CreditPackage {
            let package = self.credit_package(item_id).ok_or_else(|| {
                ApiError::NotFound(format!("Credit package {} not found", item_id))
            })?;
            return Ok(PricedItem {
                item_type,
                course_id: None,
                section_id: None,
                package_id: Some(package.id),
                title: package.title,
                unit_price: package.price,
            });
        }

        let id = Uuid::parse_str(item_id)
            .map_err(|_| ApiError::BadRequest(format!("Invalid item id: {}", item_id)))?;

        let price = entity::catalog_prices::Entity::find()
            .filter(entity::catalog_prices::Column::ItemType.eq(item_type))
            .filter(entity::catalog_prices::Column::ItemId.eq(id))
            .filter(entity::catalog_prices::Column::Active.eq(true))
            .one(&self.db)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("{:?} {} is not for sale", item_type, id)))?;

        Ok(PricedItem {
            item_type,
            course_id: (item_type == ItemType::Course).then_some(id),
            section_id: (item_type == ItemType::Section).then_some(id),
            package_id: None,
            title: price.title,
            unit_price: price.price,
        })
    }

    fn credit_package(&self, package_id: &str) -> Option<CreditPackageConfig> {
        self.packages.iter().find(|p| p.id == package_id).cloned()
    }
}
