//! Namespace and class registry with version-aware resolution.
//!
//! Namespaces and their classes are declared once, at startup or extension
//! load time, through a [`MetamodelBuilder`]. `freeze()` validates the whole
//! declaration set and produces an immutable [`Metamodel`] that models share.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use semver::Version;

use crate::errors::{ModelError, Result};
use crate::fields::FieldDef;
use crate::relations::{RelationDef, RelationKind};
use crate::version::{format_version, parse_version, trim_version};

/// Handle to a namespace in a frozen metamodel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceId(pub(crate) u32);

/// Handle to a single class registration in a frozen metamodel.
///
/// Two registrations of the same name with different version ranges are two
/// distinct `ClassId`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub(crate) u32);

/// A fully resolved class name: namespace handle plus local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassName {
    pub ns: NamespaceId,
    pub name: String,
}

impl ClassName {
    pub fn new(ns: NamespaceId, name: impl Into<String>) -> Self {
        Self {
            ns,
            name: name.into(),
        }
    }
}

/// A class name that still needs namespace resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassRef {
    /// Already resolved to a namespace handle
    Resolved(ClassName),
    /// Qualified by a namespace alias or URI
    Qualified { ns: String, name: String },
    /// Unqualified; must match exactly one namespace globally
    Unqualified(String),
}

impl From<ClassName> for ClassRef {
    fn from(v: ClassName) -> Self {
        ClassRef::Resolved(v)
    }
}

impl From<&str> for ClassRef {
    fn from(v: &str) -> Self {
        match v.rsplit_once(':') {
            Some((ns, name)) if !ns.is_empty() && !ns.contains('/') => ClassRef::Qualified {
                ns: ns.to_string(),
                name: name.to_string(),
            },
            _ => ClassRef::Unqualified(v.to_string()),
        }
    }
}

/// Outcome of matching a URI against a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriMatch {
    /// The URI does not belong to this namespace
    No,
    /// Exact match against an unversioned namespace
    Plain,
    /// Match against a versioned namespace; `None` when the version field
    /// was empty or still the literal placeholder
    Versioned(Option<Version>),
}

/// A namespace: one naming authority's catalog of declared classes.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub uri: String,
    pub alias: String,
    pub viewpoint: Option<String>,
    pub maxver: Option<Version>,
    pub version_precision: usize,
}

impl Namespace {
    /// Whether the URI carries a `{VERSION}` placeholder.
    pub fn is_versioned(&self) -> bool {
        self.uri.contains("{VERSION}")
    }

    /// Match a concrete URI against this namespace's (possibly templated) URI.
    pub fn match_uri(&self, uri: &str) -> UriMatch {
        if !self.is_versioned() {
            return if uri == self.uri {
                UriMatch::Plain
            } else {
                UriMatch::No
            };
        }

        let (prefix, suffix) = self
            .uri
            .split_once("{VERSION}")
            .expect("versioned URI has a placeholder");
        if uri.len() < prefix.len() + suffix.len()
            || !uri.starts_with(prefix)
            || !uri.ends_with(suffix)
        {
            return UriMatch::No;
        }
        let version = &uri[prefix.len()..uri.len() - suffix.len()];
        if version.contains('/') {
            return UriMatch::No;
        }
        if version.is_empty() || version == "{VERSION}" {
            return UriMatch::Versioned(None);
        }
        match parse_version(version) {
            Ok(v) => UriMatch::Versioned(Some(self.trim_version(&v))),
            Err(_) => UriMatch::No,
        }
    }

    /// Trim a version to this namespace's precision.
    pub fn trim_version(&self, version: &Version) -> Version {
        trim_version(version, self.version_precision)
    }

    /// The concrete URI for a given version; unversioned URIs pass through.
    pub fn versioned_uri(&self, version: Option<&Version>) -> Result<String> {
        if !self.is_versioned() {
            return Ok(self.uri.clone());
        }
        let version = version.ok_or_else(|| ModelError::MissingVersion {
            namespace: self.uri.clone(),
        })?;
        Ok(self
            .uri
            .replace("{VERSION}", &format_version(&self.trim_version(version))))
    }
}

/// A single class declaration.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub namespace: NamespaceId,
    pub abstract_: bool,
    pub parent: Option<ClassId>,
    pub(crate) properties: Vec<(String, Property)>,
}

/// A named property of a class: a scalar field or a relationship.
#[derive(Debug, Clone)]
pub enum Property {
    Field(FieldDef),
    Relation(RelationDef),
}

struct ClassReg {
    class: ClassId,
    minver: Version,
    maxver: Option<Version>,
}

/// The frozen, process-shared metamodel.
pub struct Metamodel {
    namespaces: Vec<Namespace>,
    classes: Vec<ClassDef>,
    by_alias: HashMap<String, NamespaceId>,
    registrations: HashMap<(NamespaceId, String), Vec<ClassReg>>,
    root: ClassId,
}

impl fmt::Debug for Metamodel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metamodel")
            .field("namespaces", &self.namespaces.len())
            .field("classes", &self.classes.len())
            .finish()
    }
}

impl Metamodel {
    pub fn namespace(&self, id: NamespaceId) -> &Namespace {
        &self.namespaces[id.0 as usize]
    }

    pub fn class(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.0 as usize]
    }

    /// The root of the single-rooted class hierarchy.
    pub fn root(&self) -> ClassId {
        self.root
    }

    /// `alias:Name` rendering for diagnostics.
    pub fn qualname(&self, id: ClassId) -> String {
        let class = self.class(id);
        format!("{}:{}", self.namespace(class.namespace).alias, class.name)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (NamespaceId, &Namespace)> {
        self.namespaces
            .iter()
            .enumerate()
            .map(|(i, ns)| (NamespaceId(i as u32), ns))
    }

    /// Find a namespace by its preferred alias.
    pub fn find_namespace(&self, alias: &str) -> Result<NamespaceId> {
        self.by_alias
            .get(alias)
            .copied()
            .ok_or_else(|| ModelError::UnknownNamespace {
                name: alias.to_string(),
            })
    }

    /// Find a namespace by a concrete URI.
    ///
    /// For versioned namespaces the second element is the version embedded
    /// in the URI, if any.
    pub fn find_namespace_by_uri(&self, uri: &str) -> Result<(NamespaceId, Option<Version>)> {
        for (id, ns) in self.namespaces() {
            match ns.match_uri(uri) {
                UriMatch::No => continue,
                UriMatch::Plain => return Ok((id, None)),
                UriMatch::Versioned(v) => return Ok((id, v)),
            }
        }
        Err(ModelError::UnknownNamespace {
            name: uri.to_string(),
        })
    }

    /// Whether the namespace contains any registration under `name`.
    pub fn contains_class(&self, ns: NamespaceId, name: &str) -> bool {
        self.registrations.contains_key(&(ns, name.to_string()))
    }

    /// Resolve a class name within a namespace for a given version.
    ///
    /// Among the registrations admitting the version, the one with the
    /// highest minimum version wins; that is how a later registration
    /// shadows an earlier one starting at its minimum version.
    pub fn get_class(
        &self,
        ns: NamespaceId,
        name: &str,
        version: Option<&Version>,
    ) -> Result<ClassId> {
        let nsdef = self.namespace(ns);
        if nsdef.is_versioned() && version.is_none() {
            return Err(ModelError::MissingVersion {
                namespace: nsdef.uri.clone(),
            });
        }

        let missing = || ModelError::MissingClass {
            namespace: nsdef.uri.clone(),
            name: name.to_string(),
            version: version.map(format_version),
        };

        let regs = self
            .registrations
            .get(&(ns, name.to_string()))
            .ok_or_else(missing)?;

        let mut eligible: Vec<&ClassReg> = regs
            .iter()
            .filter(|reg| match version {
                Some(v) => {
                    *v >= reg.minver && reg.maxver.as_ref().is_none_or(|max| v <= max)
                }
                None => true,
            })
            .collect();
        eligible.sort_by(|a, b| b.minver.cmp(&a.minver));
        eligible.first().map(|reg| reg.class).ok_or_else(missing)
    }

    /// Subtype check along the single-rooted hierarchy.
    pub fn is_subclass(&self, mut sub: ClassId, sup: ClassId) -> bool {
        loop {
            if sub == sup {
                return true;
            }
            match self.class(sub).parent {
                Some(parent) => sub = parent,
                None => return false,
            }
        }
    }

    /// Look up a property by name, walking the ancestor chain.
    pub fn property(&self, class: ClassId, name: &str) -> Option<&Property> {
        let mut cur = Some(class);
        while let Some(id) = cur {
            let def = self.class(id);
            if let Some((_, prop)) = def.properties.iter().find(|(n, _)| n == name) {
                return Some(prop);
            }
            cur = def.parent;
        }
        None
    }

    /// All properties visible on a class, ancestors first, overrides applied.
    pub fn properties(&self, class: ClassId) -> Vec<(&str, &Property)> {
        let mut chain = Vec::new();
        let mut cur = Some(class);
        while let Some(id) = cur {
            chain.push(id);
            cur = self.class(id).parent;
        }
        chain.reverse();

        let mut out: Vec<(&str, &Property)> = Vec::new();
        for id in chain {
            for (name, prop) in &self.class(id).properties {
                match out.iter_mut().find(|(n, _)| *n == name.as_str()) {
                    Some(slot) => slot.1 = prop,
                    None => out.push((name.as_str(), prop)),
                }
            }
        }
        out
    }

    /// All non-abstract registrations that subtype `base`, in registration order.
    pub fn concrete_subclasses(&self, base: ClassId) -> Vec<ClassId> {
        (0..self.classes.len() as u32)
            .map(ClassId)
            .filter(|&id| !self.class(id).abstract_ && self.is_subclass(id, base))
            .collect()
    }
}

/// Declaration of a namespace, consumed by [`MetamodelBuilder::namespace`].
#[derive(Debug, Clone)]
pub struct NamespaceSpec {
    pub uri: String,
    pub alias: String,
    pub viewpoint: Option<String>,
    pub maxver: Option<String>,
    pub version_precision: usize,
}

impl NamespaceSpec {
    pub fn new(uri: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            alias: alias.into(),
            viewpoint: None,
            maxver: None,
            version_precision: 1,
        }
    }

    pub fn viewpoint(mut self, name: impl Into<String>) -> Self {
        self.viewpoint = Some(name.into());
        self
    }

    pub fn maxver(mut self, version: impl Into<String>) -> Self {
        self.maxver = Some(version.into());
        self
    }

    pub fn version_precision(mut self, precision: usize) -> Self {
        self.version_precision = precision;
        self
    }
}

/// Declaration of a class, consumed by [`MetamodelBuilder::class`].
#[derive(Debug, Clone)]
pub struct ClassSpec {
    name: String,
    parent: Option<ClassId>,
    abstract_: bool,
    minver: Option<String>,
    maxver: Option<String>,
    properties: Vec<(String, Property)>,
}

impl ClassSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            abstract_: false,
            minver: None,
            maxver: None,
            properties: Vec::new(),
        }
    }

    pub fn parent(mut self, parent: ClassId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Abstract classes cannot be instantiated directly.
    pub fn abstract_(mut self) -> Self {
        self.abstract_ = true;
        self
    }

    /// Minimum namespace version this registration is valid for (inclusive).
    pub fn minver(mut self, version: impl Into<String>) -> Self {
        self.minver = Some(version.into());
        self
    }

    /// Maximum namespace version this registration is valid for (inclusive).
    pub fn maxver(mut self, version: impl Into<String>) -> Self {
        self.maxver = Some(version.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: FieldDef) -> Self {
        self.properties.push((name.into(), Property::Field(field)));
        self
    }

    pub fn relation(mut self, name: impl Into<String>, relation: RelationDef) -> Self {
        self.properties
            .push((name.into(), Property::Relation(relation)));
        self
    }
}

/// Builder for the one-time, idempotent registration phase.
///
/// All namespaces and classes are declared here; `freeze()` checks the
/// declarations for consistency and returns the shared, read-only
/// [`Metamodel`].
#[derive(Default)]
pub struct MetamodelBuilder {
    namespaces: Vec<Namespace>,
    classes: Vec<ClassDef>,
    by_alias: HashMap<String, NamespaceId>,
    registrations: HashMap<(NamespaceId, String), Vec<ClassReg>>,
}

impl MetamodelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace. Re-registering an alias or URI is an error.
    pub fn namespace(&mut self, spec: NamespaceSpec) -> Result<NamespaceId> {
        if spec.version_precision == 0 {
            return Err(ModelError::Registration {
                reason: "Version precision cannot be zero".into(),
            });
        }
        let versioned = spec.uri.contains("{VERSION}");
        if versioned && spec.maxver.is_none() {
            return Err(ModelError::Registration {
                reason: format!(
                    "Versioned namespace {:?} must declare its supported maxver",
                    spec.uri
                ),
            });
        }
        if !versioned && spec.maxver.is_some() {
            return Err(ModelError::Registration {
                reason: format!("Unversioned namespace {:?} cannot declare a maxver", spec.uri),
            });
        }
        if self.by_alias.contains_key(&spec.alias) {
            return Err(ModelError::Registration {
                reason: format!("Namespace alias {:?} is already registered", spec.alias),
            });
        }
        if self.namespaces.iter().any(|ns| ns.uri == spec.uri) {
            return Err(ModelError::Registration {
                reason: format!("Namespace URI {:?} is already registered", spec.uri),
            });
        }

        let maxver = spec.maxver.as_deref().map(parse_version).transpose()?;
        let id = NamespaceId(self.namespaces.len() as u32);
        self.by_alias.insert(spec.alias.clone(), id);
        self.namespaces.push(Namespace {
            uri: spec.uri,
            alias: spec.alias,
            viewpoint: spec.viewpoint,
            maxver,
            version_precision: spec.version_precision,
        });
        Ok(id)
    }

    /// Register a class in a namespace.
    ///
    /// The same name may be registered several times with different minimum
    /// versions; registering the same (name, minver) pair twice is an error.
    pub fn class(&mut self, ns: NamespaceId, spec: ClassSpec) -> Result<ClassId> {
        if ns.0 as usize >= self.namespaces.len() {
            return Err(ModelError::Registration {
                reason: "Unknown namespace handle".into(),
            });
        }
        let minver = match spec.minver.as_deref() {
            Some(v) => parse_version(v)?,
            None => semver::Version::new(0, 0, 0),
        };
        let maxver = spec.maxver.as_deref().map(parse_version).transpose()?;

        let mut seen = std::collections::HashSet::new();
        for (name, _) in &spec.properties {
            if !seen.insert(name.clone()) {
                return Err(ModelError::Registration {
                    reason: format!(
                        "Class {:?} declares property {name:?} more than once",
                        spec.name
                    ),
                });
            }
        }

        let regs = self
            .registrations
            .entry((ns, spec.name.clone()))
            .or_default();
        if regs.iter().any(|r| r.minver == minver) {
            return Err(ModelError::Registration {
                reason: format!(
                    "Class {:?} is already registered for minver {minver} in this namespace",
                    spec.name
                ),
            });
        }

        let id = ClassId(self.classes.len() as u32);
        regs.push(ClassReg {
            class: id,
            minver,
            maxver,
        });
        self.classes.push(ClassDef {
            name: spec.name,
            namespace: ns,
            abstract_: spec.abstract_,
            parent: spec.parent,
            properties: spec.properties,
        });
        Ok(id)
    }

    /// Validate all declarations and produce the immutable metamodel.
    pub fn freeze(self) -> Result<Arc<Metamodel>> {
        let mut roots = self
            .classes
            .iter()
            .enumerate()
            .filter(|(_, c)| c.parent.is_none())
            .map(|(i, _)| ClassId(i as u32));
        let root = roots.next().ok_or_else(|| ModelError::Registration {
            reason: "Metamodel has no root class".into(),
        })?;
        if let Some(extra) = roots.next() {
            return Err(ModelError::Registration {
                reason: format!(
                    "Class hierarchy must have a single root, found a second one: {:?}",
                    self.classes[extra.0 as usize].name
                ),
            });
        }

        let model = Metamodel {
            namespaces: self.namespaces,
            classes: self.classes,
            by_alias: self.by_alias,
            registrations: self.registrations,
            root,
        };

        for id in (0..model.classes.len() as u32).map(ClassId) {
            model.check_class(id)?;
        }
        Ok(Arc::new(model))
    }
}

impl Metamodel {
    fn check_class(&self, id: ClassId) -> Result<()> {
        let class = self.class(id);
        let classname = self.qualname(id);

        // Every class must reach the root through its parent chain; a cycle
        // would loop forever, so bound the walk by the class count.
        let mut cur = id;
        for _ in 0..=self.classes.len() {
            match self.class(cur).parent {
                Some(parent) => cur = parent,
                None => break,
            }
        }
        if self.class(cur).parent.is_some() {
            return Err(ModelError::Registration {
                reason: format!("Class {classname} is part of a parent cycle"),
            });
        }

        for (name, prop) in &class.properties {
            let Property::Relation(rel) = prop else {
                continue;
            };
            self.check_relation(id, &classname, name, &rel.kind)?;
        }
        Ok(())
    }

    fn check_relation(
        &self,
        class: ClassId,
        classname: &str,
        attr: &str,
        kind: &RelationKind,
    ) -> Result<()> {
        let check_target = |target: &ClassName| -> Result<()> {
            if !self.contains_class(target.ns, &target.name) {
                return Err(ModelError::Registration {
                    reason: format!(
                        "{classname}.{attr} is bound to unregistered class {:?}",
                        target.name
                    ),
                });
            }
            Ok(())
        };

        match kind {
            RelationKind::Containment(c) => check_target(&c.class),
            RelationKind::Association(a) => check_target(&a.class),
            RelationKind::Allocation(a) => {
                check_target(&a.class)?;
                check_target(&a.alloc_type)
            }
            RelationKind::Backref(b) => check_target(&b.class),
            RelationKind::Filter(f) => {
                check_target(&f.class)?;
                match self.property(class, &f.attr) {
                    Some(Property::Relation(wrapped)) if wrapped.kind.is_writable_storage() => {
                        Ok(())
                    }
                    Some(_) => Err(ModelError::Registration {
                        reason: format!(
                            "{classname}.{attr} can only filter on a storage relationship, \
                             but {:?} is not one",
                            f.attr
                        ),
                    }),
                    None => Err(ModelError::Registration {
                        reason: format!(
                            "{classname}.{attr} filters on {:?}, which is not defined",
                            f.attr
                        ),
                    }),
                }
            }
            RelationKind::Single { wrapped, .. } => match wrapped.as_ref() {
                RelationKind::Single { .. } => Err(ModelError::Registration {
                    reason: format!("{classname}.{attr}: Single cannot wrap another Single"),
                }),
                inner => self.check_relation(class, classname, attr, inner),
            },
        }
    }
}
