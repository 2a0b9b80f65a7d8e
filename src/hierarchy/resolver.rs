//! Method resolution and subtype tests over class summaries.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use crate::{classfile::ClassFile, hierarchy::ClassSource, Result};

/// Maximum number of supertypes visited while answering one question
const MAX_HIERARCHY_DEPTH: usize = 100;

/// A declared method, identified by name and descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
}

/// The parts of a class file the hierarchy needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Internal name
    pub name: String,
    /// Internal name of the superclass, `None` for `java/lang/Object`
    pub super_name: Option<String>,
    /// Internal names of the direct superinterfaces
    pub interfaces: Vec<String>,
    /// Whether the type is an interface
    pub is_interface: bool,
    /// Methods declared by the type itself
    pub methods: Vec<MethodKey>,
}

impl TypeInfo {
    /// Summarize a parsed class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a name or descriptor index is invalid.
    pub fn from_class(class: &ClassFile) -> Result<Self> {
        let methods = class
            .methods
            .iter()
            .map(|method| -> Result<MethodKey> {
                Ok(MethodKey {
                    name: class.member_name(method)?,
                    descriptor: class.member_descriptor(method)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TypeInfo {
            name: class.name()?,
            super_name: class.super_name()?,
            interfaces: class.interface_names()?,
            is_interface: class.is_interface(),
            methods,
        })
    }

    /// Parse class file bytes and summarize them.
    ///
    /// # Errors
    /// Returns the parse error for invalid class files.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::from_class(&ClassFile::parse(bytes)?)
    }

    /// Whether the type itself declares `name` with `descriptor`.
    #[must_use]
    pub fn declares(&self, name: &str, descriptor: &str) -> bool {
        self.methods
            .iter()
            .any(|method| method.name == name && method.descriptor == descriptor)
    }

    /// Direct supertypes, superclass first.
    pub fn supertypes(&self) -> impl Iterator<Item = &str> {
        self.super_name
            .as_deref()
            .into_iter()
            .chain(self.interfaces.iter().map(String::as_str))
    }
}

/// Outcome of resolving a call site's target method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The method is declared by `declaring`
    Resolved {
        /// Internal name of the declaring type
        declaring: String,
    },
    /// The declaration could not be found
    Unresolved {
        /// Why resolution failed
        reason: String,
    },
}

impl Resolution {
    /// The declaring type, if resolution succeeded.
    #[must_use]
    pub fn declaring(&self) -> Option<&str> {
        match self {
            Resolution::Resolved { declaring } => Some(declaring),
            Resolution::Unresolved { .. } => None,
        }
    }

    fn unresolved(reason: impl Into<String>) -> Self {
        Resolution::Unresolved {
            reason: reason.into(),
        }
    }
}

/// Type hierarchy view for one transformation.
///
/// Summaries are loaded from the [`ClassSource`] on first use and memoized, including the
/// answer that a class is unavailable. The memo lives as long as the hierarchy, which is created
/// per transformation, so nothing is shared between concurrent transformations.
///
/// # Examples
///
/// ```rust
/// use threadscope::classfile::ClassBuilder;
/// use threadscope::hierarchy::{MemorySource, Resolution, TypeHierarchy};
///
/// let mut thread = ClassBuilder::new("java/lang/Thread", "java/lang/Object");
/// thread.abstract_method(0x0401, "start", "()V");
/// let worker = ClassBuilder::new("com/example/Worker", "java/lang/Thread");
///
/// let mut source = MemorySource::new();
/// source.insert("java/lang/Thread", thread.build()?);
/// source.insert("com/example/Worker", worker.build()?);
///
/// let hierarchy = TypeHierarchy::new(&source);
/// assert_eq!(
///     hierarchy.resolve_method("com/example/Worker", "start", "()V"),
///     Resolution::Resolved { declaring: "java/lang/Thread".to_string() }
/// );
/// assert!(hierarchy.is_subtype_of("com/example/Worker", "java/lang/Thread"));
/// # Ok::<(), threadscope::Error>(())
/// ```
pub struct TypeHierarchy<'s> {
    source: &'s dyn ClassSource,
    known: RefCell<HashMap<String, Option<Arc<TypeInfo>>>>,
}

impl<'s> TypeHierarchy<'s> {
    /// Create a hierarchy backed by `source`.
    pub fn new(source: &'s dyn ClassSource) -> Self {
        TypeHierarchy {
            source,
            known: RefCell::new(HashMap::new()),
        }
    }

    /// Make `info` known without a lookup, replacing any previous answer for its name.
    pub fn seed(&self, info: Arc<TypeInfo>) {
        self.known.borrow_mut().insert(info.name.clone(), Some(info));
    }

    /// Summary of `name`, `None` if the class is not available.
    ///
    /// Source errors and unparsable class files count as unavailable.
    pub fn lookup(&self, name: &str) -> Option<Arc<TypeInfo>> {
        if let Some(known) = self.known.borrow().get(name) {
            return known.clone();
        }

        let info = match self.source.load(name) {
            Ok(Some(bytes)) => match TypeInfo::parse(&bytes) {
                Ok(info) if info.name == name => Some(Arc::new(info)),
                Ok(info) => {
                    log::debug!("Lookup of {} produced class {}", name, info.name);
                    None
                }
                Err(error) => {
                    log::debug!("Could not parse {}: {}", name, error);
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                log::debug!("Could not load {}: {}", name, error);
                None
            }
        };

        self.known
            .borrow_mut()
            .insert(name.to_string(), info.clone());
        info
    }

    /// Find the type declaring the method `name` + `descriptor` as seen from `owner`.
    ///
    /// The superclass chain starting at `owner` is searched first, then the superinterfaces of
    /// every class on that chain, breadth first. The first declaration found wins.
    pub fn resolve_method(&self, owner: &str, name: &str, descriptor: &str) -> Resolution {
        if owner.starts_with('[') {
            return Resolution::unresolved(format!("{owner} is an array type"));
        }

        let mut interfaces = VecDeque::new();
        let mut current = owner.to_string();
        for _ in 0..MAX_HIERARCHY_DEPTH {
            let Some(info) = self.lookup(&current) else {
                return if current == owner {
                    Resolution::unresolved(format!("class {current} not found"))
                } else {
                    Resolution::unresolved(format!("superclass {current} of {owner} not found"))
                };
            };

            if info.declares(name, descriptor) {
                return Resolution::Resolved {
                    declaring: info.name.clone(),
                };
            }
            interfaces.extend(info.interfaces.iter().cloned());

            match &info.super_name {
                Some(super_name) => current = super_name.clone(),
                None => return self.resolve_in_interfaces(owner, interfaces, name, descriptor),
            }
        }

        Resolution::unresolved(format!("hierarchy of {owner} is too deep"))
    }

    fn resolve_in_interfaces(
        &self,
        owner: &str,
        mut pending: VecDeque<String>,
        name: &str,
        descriptor: &str,
    ) -> Resolution {
        let mut visited = HashSet::new();
        let mut missing = None;

        while let Some(interface) = pending.pop_front() {
            if !visited.insert(interface.clone()) || visited.len() > MAX_HIERARCHY_DEPTH {
                continue;
            }

            let Some(info) = self.lookup(&interface) else {
                missing.get_or_insert(interface);
                continue;
            };
            if info.declares(name, descriptor) {
                return Resolution::Resolved {
                    declaring: info.name.clone(),
                };
            }
            pending.extend(info.interfaces.iter().cloned());
        }

        match missing {
            Some(interface) => Resolution::unresolved(format!(
                "no declaration in {owner} or its supertypes, interface {interface} not found"
            )),
            None => Resolution::unresolved(format!("no declaration in {owner} or its supertypes")),
        }
    }

    /// Whether `candidate` is `target` or one of its transitive subtypes.
    ///
    /// A supertype that cannot be looked up ends that path of the search.
    pub fn is_subtype_of(&self, candidate: &str, target: &str) -> bool {
        if candidate == target {
            return true;
        }

        let mut visited = HashSet::new();
        let mut pending = vec![candidate.to_string()];
        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) || visited.len() > MAX_HIERARCHY_DEPTH {
                continue;
            }
            let Some(info) = self.lookup(&name) else {
                continue;
            };
            for supertype in info.supertypes() {
                if supertype == target {
                    return true;
                }
                pending.push(supertype.to_string());
            }
        }

        false
    }
}
