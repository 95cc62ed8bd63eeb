use std::{collections::HashMap, str::FromStr, sync::Arc};

use figment::providers::Env;

use super::{Catalog, MemoryCatalog};
use crate::error::{CatalogConfigurationError, LoadCatalogError};

/// Short backend name, one of [`TYPE_IN_MEMORY`] or [`TYPE_SQL`].
pub const PROPERTY_TYPE: &str = "type";
/// Full path of the backend implementation, for example [`CATALOG_IMPL_SQL`].
pub const PROPERTY_CATALOG_IMPL: &str = "catalog-impl";
/// Connection string of the SQL backend.
pub const PROPERTY_URI: &str = "uri";

pub const TYPE_IN_MEMORY: &str = "in-memory";
pub const TYPE_SQL: &str = "sql";

pub const CATALOG_IMPL_IN_MEMORY: &str = "tablekeeper::catalog::MemoryCatalog";
pub const CATALOG_IMPL_SQL: &str = "tablekeeper::catalog::SqlCatalog";

const ENV_PREFIX: &str = "TABLEKEEPER_CATALOG__";
const SQLITE_URI_SCHEME: &str = "sqlite:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "kebab-case")]
enum CatalogType {
    InMemory,
    Sql,
}

const CATALOG_IMPLS: &[(&str, CatalogType)] = &[
    (CATALOG_IMPL_IN_MEMORY, CatalogType::InMemory),
    (CATALOG_IMPL_SQL, CatalogType::Sql),
];

fn configuration_error(message: impl std::fmt::Display) -> CatalogConfigurationError {
    CatalogConfigurationError::new(format!("Could not initialize Catalog: {message}"))
}

/// Properties of catalog `name` from `TABLEKEEPER_CATALOG__<NAME>__<KEY>`
/// environment variables, overridden by `properties`.
fn resolve_properties(
    name: &str,
    properties: HashMap<String, String>,
) -> HashMap<String, String> {
    let prefix = format!(
        "{ENV_PREFIX}{}__",
        name.to_uppercase().replace(['-', '.'], "_")
    );
    let env = Env::prefixed(&prefix)
        .map(|key| key.as_str().to_ascii_lowercase().replace('_', "-").into());
    let mut resolved: HashMap<String, String> = env
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), value))
        .collect();
    if !resolved.is_empty() {
        tracing::debug!(
            "Catalog {name} takes properties {:?} from the environment",
            resolved.keys().collect::<Vec<_>>()
        );
    }
    resolved.extend(properties);
    resolved
}

fn resolve_type(properties: &HashMap<String, String>) -> Result<CatalogType, CatalogConfigurationError> {
    match (
        properties.get(PROPERTY_TYPE),
        properties.get(PROPERTY_CATALOG_IMPL),
    ) {
        (Some(r#type), Some(catalog_impl)) => Err(configuration_error(format!(
            "Must not set both `{PROPERTY_TYPE}` ({type}) and `{PROPERTY_CATALOG_IMPL}` ({catalog_impl})"
        ))),
        (Some(r#type), None) => CatalogType::from_str(r#type).map_err(|_| {
            configuration_error(format!(
                "Unknown catalog type `{type}`, expected `{TYPE_IN_MEMORY}` or `{TYPE_SQL}`"
            ))
        }),
        (None, Some(catalog_impl)) => {
            if !catalog_impl.contains("::") {
                return Err(configuration_error(format!(
                    "`{PROPERTY_CATALOG_IMPL}` must be a full path, found `{catalog_impl}`"
                )));
            }
            CATALOG_IMPLS
                .iter()
                .find(|(path, _)| path == catalog_impl)
                .map(|(_, r#type)| *r#type)
                .ok_or_else(|| {
                    configuration_error(format!("No catalog implementation named `{catalog_impl}`"))
                })
        }
        (None, None) => Ok(
            match properties.get(PROPERTY_URI) {
                Some(uri) if uri.starts_with(SQLITE_URI_SCHEME) => CatalogType::Sql,
                _ => CatalogType::InMemory,
            },
        ),
    }
}

/// Builds catalog `name` from `properties` merged over its environment configuration.
///
/// The backend is chosen by `type` or `catalog-impl`. Without either, a
/// `sqlite:` uri selects the SQL catalog and anything else the in-memory one.
pub async fn load_catalog(
    name: &str,
    properties: HashMap<String, String>,
) -> Result<Arc<dyn Catalog>, LoadCatalogError> {
    let properties = resolve_properties(name, properties);
    let r#type = resolve_type(&properties)?;
    tracing::info!("Loading {type} catalog {name}");

    match r#type {
        CatalogType::InMemory => Ok(Arc::new(MemoryCatalog::new(name, properties)?)),
        #[cfg(feature = "sqlx-sqlite")]
        CatalogType::Sql => Ok(Arc::new(
            super::SqlCatalog::connect(name, properties).await?,
        )),
        #[cfg(not(feature = "sqlx-sqlite"))]
        CatalogType::Sql => Err(configuration_error(
            "the SQL catalog requires the `sqlx-sqlite` feature",
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;
    use pretty_assertions::assert_eq;

    use super::*;

    fn props(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_type_inferred_from_uri() {
        assert_eq!(resolve_type(&HashMap::new()).unwrap(), CatalogType::InMemory);
        assert_eq!(
            resolve_type(&props(&[(PROPERTY_URI, "sqlite::memory:")])).unwrap(),
            CatalogType::Sql
        );
        assert_eq!(
            resolve_type(&props(&[(PROPERTY_URI, "http://localhost:8181")])).unwrap(),
            CatalogType::InMemory
        );
    }

    #[test]
    fn test_type_and_impl_are_exclusive() {
        let err = resolve_type(&props(&[
            (PROPERTY_TYPE, TYPE_SQL),
            (PROPERTY_CATALOG_IMPL, CATALOG_IMPL_SQL),
        ]))
        .unwrap_err();
        assert!(err.message.starts_with("Could not initialize Catalog"));
    }

    #[test]
    fn test_catalog_impl_resolution() {
        assert_eq!(
            resolve_type(&props(&[(PROPERTY_CATALOG_IMPL, CATALOG_IMPL_IN_MEMORY)])).unwrap(),
            CatalogType::InMemory
        );
        let err = resolve_type(&props(&[(PROPERTY_CATALOG_IMPL, "MemoryCatalog")])).unwrap_err();
        assert!(err.message.contains("must be a full path"), "{}", err.message);
        let err =
            resolve_type(&props(&[(PROPERTY_CATALOG_IMPL, "other::RestCatalog")])).unwrap_err();
        assert!(err.message.starts_with("Could not initialize Catalog"));
        let err = resolve_type(&props(&[(PROPERTY_TYPE, "rest")])).unwrap_err();
        assert!(err.message.contains("Unknown catalog type"));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(CatalogType::InMemory.to_string(), TYPE_IN_MEMORY);
        assert_eq!(CatalogType::from_str(TYPE_SQL).unwrap(), CatalogType::Sql);
    }

    #[test]
    fn test_environment_properties_are_overridden() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TABLEKEEPER_CATALOG__PROD__URI", "sqlite::memory:");
            jail.set_env("TABLEKEEPER_CATALOG__PROD__WAREHOUSE", "memory://from-env");
            jail.set_env("TABLEKEEPER_CATALOG__PROD__CATALOG_IMPL", CATALOG_IMPL_SQL);
            jail.set_env("TABLEKEEPER_CATALOG__OTHER__WAREHOUSE", "memory://other");

            let properties = resolve_properties(
                "prod",
                hashmap! { "warehouse".to_string() => "memory://explicit".to_string() },
            );
            assert_eq!(
                properties,
                hashmap! {
                    "uri".to_string() => "sqlite::memory:".to_string(),
                    "warehouse".to_string() => "memory://explicit".to_string(),
                    "catalog-impl".to_string() => CATALOG_IMPL_SQL.to_string(),
                }
            );
            assert_eq!(resolve_type(&properties).unwrap(), CatalogType::Sql);
            Ok(())
        });
    }

    #[tokio::test]
    async fn test_load_in_memory_catalog() {
        let catalog = load_catalog(
            "loader-memory",
            props(&[(PROPERTY_TYPE, TYPE_IN_MEMORY), ("warehouse", "memory://loader")]),
        )
        .await
        .unwrap();
        assert_eq!(catalog.name(), "loader-memory");
        assert_eq!(catalog.properties()["warehouse"], "memory://loader");
    }

    #[tokio::test]
    async fn test_load_sql_catalog_from_uri() {
        let catalog = load_catalog(
            "loader-sql",
            props(&[(PROPERTY_URI, "sqlite::memory:"), ("warehouse", "memory://loader")]),
        )
        .await
        .unwrap();
        assert!(format!("{catalog:?}").starts_with("SqlCatalog"));
    }

    #[tokio::test]
    async fn test_invalid_warehouse() {
        let err = load_catalog("loader-invalid", props(&[("warehouse", "not a url")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadCatalogError::CatalogConfigurationError(_)));
    }
}
