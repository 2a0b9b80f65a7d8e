//! The monitored type.

use std::sync::Arc;

use crate::{
    hierarchy::{ClassSource, TypeHierarchy, TypeInfo},
    Error, Result,
};

/// Internal name of the monitored type.
pub const MONITORED_TYPE: &str = "java/lang/Thread";

/// Resolved handle to the monitored type.
///
/// Resolved once while attaching and shared read-only between all transformations. Besides
/// answering "is this declaring type monitored?", the summary seeds every per-transformation
/// [`TypeHierarchy`] so calls declared on the monitored type itself never need a lookup.
#[derive(Debug, Clone)]
pub struct TargetType {
    info: Arc<TypeInfo>,
}

impl TargetType {
    /// Load and summarize the monitored type from `source`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Configuration`] if the class cannot be found, read or parsed.
    /// Instrumenting without it would silently miss subclasses, so callers treat this as fatal.
    pub fn resolve(source: &dyn ClassSource) -> Result<Self> {
        let bytes = match source.load(MONITORED_TYPE) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                return Err(Error::Configuration(format!(
                    "{MONITORED_TYPE} could not be found"
                )))
            }
            Err(error) => {
                return Err(Error::Configuration(format!(
                    "{MONITORED_TYPE} could not be loaded: {error}"
                )))
            }
        };

        let info = TypeInfo::parse(&bytes).map_err(|error| {
            Error::Configuration(format!("{MONITORED_TYPE} could not be parsed: {error}"))
        })?;
        if info.name != MONITORED_TYPE {
            return Err(Error::Configuration(format!(
                "Lookup of {MONITORED_TYPE} produced {}",
                info.name
            )));
        }

        Ok(Self::from_info(info))
    }

    /// Wrap an existing summary.
    #[must_use]
    pub fn from_info(info: TypeInfo) -> Self {
        TargetType {
            info: Arc::new(info),
        }
    }

    /// Internal name of the monitored type.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// The cached summary.
    #[must_use]
    pub fn info(&self) -> &Arc<TypeInfo> {
        &self.info
    }

    /// Whether `declaring` is the monitored type or one of its transitive subtypes.
    pub fn matches(&self, declaring: &str, hierarchy: &TypeHierarchy) -> bool {
        declaring == self.name() || hierarchy.is_subtype_of(declaring, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{classfile::ClassBuilder, hierarchy::MemorySource};

    #[test]
    fn resolve_from_source() {
        let mut source = MemorySource::new();
        source.insert(
            MONITORED_TYPE,
            ClassBuilder::new(MONITORED_TYPE, "java/lang/Object")
                .build()
                .unwrap(),
        );
        source.insert(
            "com/example/Worker",
            ClassBuilder::new("com/example/Worker", MONITORED_TYPE)
                .build()
                .unwrap(),
        );

        let target = TargetType::resolve(&source).unwrap();
        assert_eq!(target.name(), MONITORED_TYPE);

        let hierarchy = TypeHierarchy::new(&source);
        assert!(target.matches(MONITORED_TYPE, &hierarchy));
        assert!(target.matches("com/example/Worker", &hierarchy));
        assert!(!target.matches("java/lang/Object", &hierarchy));
    }

    #[test]
    fn missing_target_is_a_configuration_error() {
        let source = MemorySource::new();
        assert!(matches!(
            TargetType::resolve(&source),
            Err(Error::Configuration(_))
        ));

        let mut broken = MemorySource::new();
        broken.insert(MONITORED_TYPE, vec![0xCA, 0xFE]);
        assert!(matches!(
            TargetType::resolve(&broken),
            Err(Error::Configuration(_))
        ));
    }
}
