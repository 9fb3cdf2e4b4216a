#![forbid(unsafe_code)]
pub mod classes;
pub mod error;
pub mod format;
pub mod index;
pub mod mapping;
pub mod objects;
pub mod path;
pub(crate) mod reader;


use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use log::debug;

use crate::classes::{
    ClassDefinition, ClassDefinitionProperty, ClassInstance,
    ClassInstancePropertyState, InstanceKey, PropertyDefaultValues, Qualifier,
};
pub use crate::error::{Error, Result};
pub use crate::format::{CimType, CimVariant, Value};
use crate::format::{
    MAPPING_FOOTER_SIGNATURE, NAMESPACE_CLASS_NAME, ROOT_NAMESPACE_NAME,
    SYSTEM_NAMESPACE_NAME,
};
use crate::index::{Index, Key};
use crate::mapping::{find_current_mapping, Mapping};
use crate::objects::Objects;
use crate::path::parse_object_path;
use crate::reader::CimRead;

/// A read-only session over one CIM repository: the index B-tree, the
/// object heap, and the current page mapping.
#[derive(Debug)]
pub struct Cim {
    variant: CimVariant,
    pub index: Index,
    pub objects: Objects,
}

impl Cim {
    /// Build a session from the raw `INDEX.BTR`, `OBJECTS.DATA` and
    /// `MAPPING*.MAP` contents. The streams are read fully into
    /// memory.
    pub fn new<I, O, M>(mut index: I, mut objects: O, mappings: Vec<M>) -> Result<Self>
    where
        I: Read,
        O: Read,
        M: Read,
    {
        if mappings.is_empty() {
            return Err(Error::invalid("no mappings"));
        }

        let mapping_bufs = mappings
            .into_iter()
            .map(|mut m| {
                let mut buf = Vec::new();
                m.read_to_end(&mut buf)?;
                Ok(buf)
            })
            .collect::<Result<Vec<_>>>()?;

        let (variant, current) = find_current_mapping(&mapping_bufs)?;
        let mut current_map = Cursor::new(mapping_bufs[current].as_slice());

        // The current mapping file holds two records back to back: the
        // objects mapping first, then the index mapping.
        let objects_mapping = Mapping::read(&mut current_map, variant)?;

        // Some Windows 10 index mappings have no footer signature, but
        // the objects mapping always has one, so it is checked here
        // between the two records.
        let footer_signature = current_map.read_u32()?;
        if footer_signature != MAPPING_FOOTER_SIGNATURE {
            return Err(Error::invalid(format!(
                "invalid footer signature in objects mapping: {footer_signature:#x}"
            )));
        }

        let index_mapping = Mapping::read(&mut current_map, variant)?;

        let mut objects_buf = Vec::new();
        objects.read_to_end(&mut objects_buf)?;
        let objects = Objects::new(objects_buf, objects_mapping);

        let mut index_buf = Vec::new();
        index.read_to_end(&mut index_buf)?;
        let index = Index::new(variant, index_buf, index_mapping)?;

        debug!("opened CIM repository, variant {variant:?}");
        Ok(Cim {
            variant,
            index,
            objects,
        })
    }

    /// Open a repository directory containing `INDEX.BTR`,
    /// `OBJECTS.DATA` and `MAPPING1.MAP`..`MAPPING3.MAP`.
    pub fn from_directory(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let index = File::open(path.join("INDEX.BTR"))?;
        let objects = File::open(path.join("OBJECTS.DATA"))?;
        let mappings = (1..=3)
            .map(|i| File::open(path.join(format!("MAPPING{i}.MAP"))))
            .collect::<std::io::Result<Vec<_>>>()?;
        Self::new(index, objects, mappings)
    }

    pub fn variant(&self) -> CimVariant {
        self.variant
    }

    /// An empty key rooted at this repository's digest variant.
    pub fn key(&self) -> Key {
        Key::new(self.variant)
    }

    pub fn root(&self) -> Namespace<'_> {
        self.namespace(ROOT_NAMESPACE_NAME)
    }

    pub fn system(&self) -> Namespace<'_> {
        self.namespace(SYSTEM_NAMESPACE_NAME)
    }

    pub fn namespace(&self, name: &str) -> Namespace<'_> {
        Namespace {
            cim: self,
            name: name.to_owned(),
            class_instance: None,
        }
    }

    /// Resolve an object path (see [`path`]) relative to `ns`.
    pub fn query<'s>(
        &'s self,
        object_path: &str,
        ns: Option<&Namespace<'s>>,
    ) -> Result<QueryResult<'s>> {
        let parsed = parse_object_path(object_path, ns)?;

        if parsed.hostname != "localhost" {
            return Err(Error::InvalidPath(format!(
                "unsupported hostname: {}",
                parsed.hostname
            )));
        }
        if parsed.namespace.is_empty() {
            return Err(Error::InvalidPath(format!(
                "no namespace in object path: {object_path}"
            )));
        }

        let namespace = self.namespace(&parsed.namespace);
        if parsed.class_name.is_empty() {
            return Ok(QueryResult::Namespace(namespace));
        }

        let class = namespace.into_class(&parsed.class_name)?;
        if parsed.keys.is_empty() {
            return Ok(QueryResult::Class(class));
        }

        let mut key = InstanceKey::new();
        for (name, value) in parsed.keys {
            key.insert(name, Value::String(value));
        }
        let instance = class.instance(&key)?;
        Ok(QueryResult::Instance(instance))
    }

    /// Fetch and parse the class definition behind a `NS/CD` key,
    /// falling back to the system namespace when the key has no
    /// reference of its own.
    pub(crate) fn get_class_definition(&self, key: &Key) -> Result<ClassDefinition> {
        let key = if key.reference(self)?.is_none() {
            let digest = key
                .parts()?
                .get("CD")
                .cloned()
                .ok_or_else(|| Error::invalid(format!("no CD segment in key {key}")))?;
            self.key().ns(SYSTEM_NAMESPACE_NAME).cd(&digest)
        } else {
            key.clone()
        };
        ClassDefinition::parse(&key.object(self)?)
    }

    pub(crate) fn get_class_instance(
        &self,
        class: &Class<'_>,
        key: &Key,
    ) -> Result<ClassInstance> {
        let slots = class.resolved_slots()?;
        ClassInstance::parse(self.variant, &slots, &key.object(self)?)
    }
}

/// Result of an object-path query: a namespace, a class, or an
/// instance.
pub enum QueryResult<'a> {
    Namespace(Namespace<'a>),
    Class(Class<'a>),
    Instance(Instance<'a>),
}

impl<'a> QueryResult<'a> {
    pub fn into_instance(self) -> Result<Instance<'a>> {
        match self {
            QueryResult::Instance(instance) => Ok(instance),
            _ => Err(Error::NotFound("query did not yield an instance".to_owned())),
        }
    }

    pub fn into_class(self) -> Result<Class<'a>> {
        match self {
            QueryResult::Class(class) => Ok(class),
            _ => Err(Error::NotFound("query did not yield a class".to_owned())),
        }
    }
}

/// A namespace of the repository, named by its backslash-delimited
/// path (e.g. `root\cimv2`).
#[derive(Clone)]
pub struct Namespace<'a> {
    cim: &'a Cim,
    pub name: String,
    /// The `__namespace` instance this namespace was enumerated from,
    /// when it was.
    class_instance: Option<Rc<ClassInstance>>,
}

impl<'a> Namespace<'a> {
    pub fn query(&self, object_path: &str) -> Result<QueryResult<'a>> {
        self.cim.query(object_path, Some(self))
    }

    pub fn class_instance(&self) -> Option<&ClassInstance> {
        self.class_instance.as_deref()
    }

    /// Look up a class by name in this namespace (falling back to the
    /// system namespace for the builtin classes).
    pub fn class_(&self, class_name: &str) -> Result<Class<'a>> {
        self.clone().into_class(class_name)
    }

    fn into_class(self, class_name: &str) -> Result<Class<'a>> {
        let key = self.cim.key().ns(&self.name).cd(class_name);
        let definition = self.cim.get_class_definition(&key)?;
        Ok(Class {
            cim: self.cim,
            namespace: self,
            definition: Rc::new(definition),
        })
    }

    /// All classes visible in this namespace: the system classes
    /// (reparented here) followed by the namespace's own, deduplicated
    /// by class name.
    pub fn classes(&self) -> Result<ClassIter<'a>> {
        let mut refs = Vec::new();
        if self.name != SYSTEM_NAMESPACE_NAME {
            let system = self.cim.key().ns(SYSTEM_NAMESPACE_NAME).cd_all();
            refs.extend(system.references(self.cim)?);
        }
        let own = self.cim.key().ns(&self.name).cd_all();
        refs.extend(own.references(self.cim)?);

        Ok(ClassIter {
            cim: self.cim,
            namespace: self.clone(),
            refs: refs.into_iter(),
            yielded: HashSet::new(),
        })
    }

    /// Look up a direct child namespace by name, case-insensitively.
    pub fn namespace(&self, name: &str) -> Result<Namespace<'a>> {
        let wanted = format!("{}\\{}", self.name, name).to_lowercase();
        for child in self.namespaces()? {
            let child = child?;
            if child.name.to_lowercase() == wanted {
                return Ok(child);
            }
        }
        Err(Error::NotFound(format!("namespace {name}")))
    }

    /// Child namespaces, enumerated from the `__namespace` instances
    /// stored under this namespace.
    pub fn namespaces(&self) -> Result<NamespaceIter<'a>> {
        let query = self
            .cim
            .key()
            .ns(&self.name)
            .ci(NAMESPACE_CLASS_NAME)
            .il();
        let class = self.cim.system().into_class(NAMESPACE_CLASS_NAME)?;
        let refs = query.references(self.cim)?;

        Ok(NamespaceIter {
            cim: self.cim,
            parent: self.clone(),
            class,
            refs: refs.into_iter(),
            yielded: HashSet::new(),
            yield_system: self.name == ROOT_NAMESPACE_NAME,
        })
    }
}

pub struct ClassIter<'a> {
    cim: &'a Cim,
    namespace: Namespace<'a>,
    refs: std::vec::IntoIter<Key>,
    yielded: HashSet<String>,
}

impl<'a> Iterator for ClassIter<'a> {
    type Item = Result<Class<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reference = self.refs.next()?;
            let definition = match self.cim.get_class_definition(&reference) {
                Ok(definition) => definition,
                Err(err) => return Some(Err(err)),
            };
            let class = Class {
                cim: self.cim,
                namespace: self.namespace.clone(),
                definition: Rc::new(definition),
            };
            let name = match class.name() {
                Ok(name) => name,
                Err(err) => return Some(Err(err)),
            };
            if self.yielded.insert(name) {
                return Some(Ok(class));
            }
        }
    }
}

pub struct NamespaceIter<'a> {
    cim: &'a Cim,
    parent: Namespace<'a>,
    class: Class<'a>,
    refs: std::vec::IntoIter<Key>,
    yielded: HashSet<String>,
    yield_system: bool,
}

impl<'a> Iterator for NamespaceIter<'a> {
    type Item = Result<Namespace<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(reference) = self.refs.next() {
            let namespace = match self.child(&reference) {
                Ok(namespace) => namespace,
                Err(err) => return Some(Err(err)),
            };
            if self.yielded.insert(namespace.name.clone()) {
                return Some(Ok(namespace));
            }
        }
        if self.yield_system {
            self.yield_system = false;
            return Some(Ok(self.cim.system()));
        }
        None
    }
}

impl<'a> NamespaceIter<'a> {
    fn child(&self, reference: &Key) -> Result<Namespace<'a>> {
        let class_instance = self.cim.get_class_instance(&self.class, reference)?;
        let instance = Instance {
            cim: self.cim,
            namespace: self.parent.clone(),
            class: self.class.clone(),
            instance: Rc::new(class_instance),
        };
        let properties = instance.properties()?;
        let name = properties
            .get("Name")
            .and_then(|p| p.value())
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::invalid("__namespace instance without a Name property")
            })?;
        Ok(Namespace {
            cim: self.cim,
            name: format!("{}\\{}", self.parent.name, name),
            class_instance: Some(Rc::clone(&instance.instance)),
        })
    }
}

/// A class bound to the namespace it was resolved in.
#[derive(Clone)]
pub struct Class<'a> {
    cim: &'a Cim,
    pub namespace: Namespace<'a>,
    definition: Rc<ClassDefinition>,
}

impl<'a> Class<'a> {
    pub fn definition(&self) -> &ClassDefinition {
        &self.definition
    }

    pub fn name(&self) -> Result<String> {
        self.definition.class_name()
    }

    pub fn qualifiers(&self) -> Result<IndexMap<String, Qualifier>> {
        self.definition.qualifiers()
    }

    /// The inheritance chain from the root class down to this one.
    pub fn derivation(&self) -> Result<Vec<Class<'a>>> {
        let mut chain = vec![self.clone()];
        loop {
            let super_name = chain.last().unwrap().definition.super_class_name.clone();
            if super_name.is_empty() {
                break;
            }
            if chain.len() > 256 {
                return Err(Error::invalid("inheritance chain too deep"));
            }
            chain.push(self.namespace.class_(&super_name)?);
        }
        chain.reverse();
        Ok(chain)
    }

    /// The resolved property set: every property declared by this
    /// class or an ancestor, leaf declarations shadowing ancestors,
    /// in derivation order.
    pub fn properties(&self) -> Result<IndexMap<String, Property<'a>>> {
        let mut properties = IndexMap::new();
        for class in self.derivation()? {
            for prop in class.definition.properties()? {
                properties.insert(
                    prop.name.clone(),
                    Property {
                        class: self.clone(),
                        prop,
                    },
                );
            }
        }
        Ok(properties)
    }

    /// `(index, type)` slots of the resolved property set, sorted by
    /// ascending index; this is the layout of instance TOCs and
    /// default-value tables.
    pub(crate) fn resolved_slots(&self) -> Result<Vec<(u16, CimType)>> {
        let mut slots: Vec<(u16, CimType)> = self
            .properties()?
            .values()
            .map(|p| (p.prop.index, p.prop.value_type))
            .collect();
        slots.sort_by_key(|(index, _)| *index);
        Ok(slots)
    }

    pub(crate) fn property_default_values(&self) -> Result<PropertyDefaultValues> {
        self.definition.default_values(&self.resolved_slots()?)
    }

    /// All instances of this class in its namespace, deduplicated by
    /// instance key.
    pub fn instances(&self) -> Result<InstanceIter<'a>> {
        let query = self
            .cim
            .key()
            .ns(&self.namespace.name)
            .ci(&self.name()?)
            .il();
        let refs = query.references(self.cim)?;
        Ok(InstanceIter {
            cim: self.cim,
            class: self.clone(),
            refs: refs.into_iter(),
            yielded: HashSet::new(),
        })
    }

    /// The instance with the given key.
    pub fn instance(&self, key: &InstanceKey) -> Result<Instance<'a>> {
        for instance in self.instances()? {
            let instance = instance?;
            if instance.key()? == *key {
                return Ok(instance);
            }
        }
        Err(Error::NotFound(format!("instance with key {key}")))
    }
}

pub struct InstanceIter<'a> {
    cim: &'a Cim,
    class: Class<'a>,
    refs: std::vec::IntoIter<Key>,
    yielded: HashSet<String>,
}

impl<'a> Iterator for InstanceIter<'a> {
    type Item = Result<Instance<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reference = self.refs.next()?;
            let class_instance =
                match self.cim.get_class_instance(&self.class, &reference) {
                    Ok(instance) => instance,
                    Err(err) => return Some(Err(err)),
                };
            let instance = Instance {
                cim: self.cim,
                namespace: self.class.namespace.clone(),
                class: self.class.clone(),
                instance: Rc::new(class_instance),
            };
            let key = match instance.key() {
                Ok(key) => key.to_string(),
                Err(err) => return Some(Err(err)),
            };
            if self.yielded.insert(key) {
                return Some(Ok(instance));
            }
        }
    }
}

/// A property of a class, with access to its default value through
/// the inheritance chain.
pub struct Property<'a> {
    class: Class<'a>,
    prop: ClassDefinitionProperty,
}

impl Property<'_> {
    pub fn name(&self) -> &str {
        &self.prop.name
    }

    pub fn value_type(&self) -> CimType {
        self.prop.value_type
    }

    pub fn qualifiers(&self) -> &IndexMap<String, Qualifier> {
        &self.prop.qualifiers
    }

    pub fn index(&self) -> u16 {
        self.prop.index
    }

    pub fn offset(&self) -> u32 {
        self.prop.offset
    }

    pub fn level(&self) -> u32 {
        self.prop.level
    }

    pub fn is_inherited(&self) -> Result<bool> {
        let defaults = self.class.property_default_values()?;
        Ok(defaults
            .states
            .definition_state(self.prop.index as usize)?
            .is_inherited)
    }

    pub fn has_default_value(&self) -> Result<bool> {
        let defaults = self.class.property_default_values()?;
        Ok(defaults
            .states
            .definition_state(self.prop.index as usize)?
            .has_default_value)
    }

    /// The default value of this property, resolved on the nearest
    /// class of the derivation that declares one.
    pub fn default_value(&self) -> Result<Value> {
        let defaults = self.class.property_default_values()?;
        let state = defaults.states.definition_state(self.prop.index as usize)?;
        if !state.has_default_value {
            return Err(Error::invalid(format!(
                "property {} has no default value",
                self.prop.name
            )));
        }

        if !state.is_inherited {
            let carrier = defaults.carrier(self.prop.index)?;
            return self
                .class
                .definition
                .property_data
                .get_value(carrier, self.prop.value_type);
        }

        // walk the derivation leaf to root, the first class that owns
        // the default wins
        for ancestor in self.class.derivation()?.into_iter().rev() {
            let defaults = ancestor.property_default_values()?;
            let state = defaults.states.definition_state(self.prop.index as usize)?;
            if !state.has_default_value {
                return Err(Error::invalid(format!(
                    "inherited default of {} has an ancestor without a default value",
                    self.prop.name
                )));
            }
            if state.is_inherited {
                continue;
            }
            let carrier = defaults.carrier(self.prop.index)?;
            return ancestor
                .definition
                .property_data
                .get_value(carrier, self.prop.value_type);
        }
        Err(Error::invalid(format!(
            "no ancestor declares the default value of {}",
            self.prop.name
        )))
    }
}

/// An instance bound to its class and namespace.
#[derive(Clone)]
pub struct Instance<'a> {
    cim: &'a Cim,
    pub namespace: Namespace<'a>,
    pub class: Class<'a>,
    instance: Rc<ClassInstance>,
}

impl<'a> Instance<'a> {
    pub fn class_instance(&self) -> &ClassInstance {
        &self.instance
    }

    pub fn name(&self) -> Result<String> {
        self.instance.class_name()
    }

    pub fn qualifiers(&self) -> Result<IndexMap<String, Qualifier>> {
        self.instance.qualifiers()
    }

    /// Resolve an object-path string relative to this instance's
    /// namespace.
    pub fn query(&self, object_path: &str) -> Result<QueryResult<'a>> {
        self.cim.query(object_path, Some(&self.namespace))
    }

    /// Property values of this instance: initialized slots resolve
    /// from the instance data, defaulted slots from the class.
    pub fn properties(&self) -> Result<IndexMap<String, InstanceProperty<'a>>> {
        let mut properties = IndexMap::new();
        for (name, prop) in self.class.properties()? {
            let state = self
                .instance
                .states
                .instance_state(prop.prop.index as usize)?;

            let value = if state.is_initialized {
                Some(if state.use_default_value {
                    prop.default_value()?
                } else {
                    let carrier = self.instance.toc_carrier(prop.prop.index)?;
                    self.instance.data.get_value(carrier, prop.prop.value_type)?
                })
            } else {
                None
            };

            properties.insert(
                name,
                InstanceProperty {
                    property: prop,
                    state,
                    value,
                },
            );
        }
        Ok(properties)
    }

    /// The instance key: values of the class's key properties in
    /// enumeration order.
    pub fn key(&self) -> Result<InstanceKey> {
        let properties = self.properties()?;
        let mut key = InstanceKey::new();
        for name in self.class.definition().key_property_names()? {
            let value = properties
                .get(&name)
                .and_then(|p| p.value())
                .cloned()
                .ok_or_else(|| {
                    Error::invalid(format!("key property {name} is not initialized"))
                })?;
            key.insert(name, value);
        }
        Ok(key)
    }
}

/// One property of an instance, with its resolved value.
pub struct InstanceProperty<'a> {
    property: Property<'a>,
    state: ClassInstancePropertyState,
    value: Option<Value>,
}

impl<'a> InstanceProperty<'a> {
    pub fn property(&self) -> &Property<'a> {
        &self.property
    }

    pub fn name(&self) -> &str {
        self.property.name()
    }

    pub fn qualifiers(&self) -> &IndexMap<String, Qualifier> {
        self.property.qualifiers()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized
    }

    pub fn is_default_value(&self) -> bool {
        self.state.is_initialized && self.state.use_default_value
    }

    /// `None` when the slot is not initialized.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}
