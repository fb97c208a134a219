use derive_more::Deref;
use lmstudio_protocol::{ModelDescriptor, ModelSpecifier};

use super::{DomainHandle, DynamicHandle};
use crate::port::WeakPort;

/// A handle pinned to one loaded instance.
///
/// Calls fail once that instance is unloaded. `identifier` and `path` are the
/// values known when the handle was created.
#[derive(Debug, Clone, Deref)]
pub struct SpecificModel<H> {
    #[deref]
    handle: H,
    instance_reference: String,
    descriptor: ModelDescriptor,
}

impl<H: DomainHandle> SpecificModel<H> {
    pub(crate) fn new(
        port: WeakPort,
        instance_reference: impl Into<String>,
        descriptor: ModelDescriptor,
    ) -> Self {
        let instance_reference = instance_reference.into();
        let specifier = ModelSpecifier::instance_reference(instance_reference.clone());
        Self {
            handle: H::from_dynamic(DynamicHandle::new(port, specifier)),
            instance_reference,
            descriptor,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.descriptor.identifier
    }

    pub fn path(&self) -> &str {
        &self.descriptor.path
    }

    pub fn instance_reference(&self) -> &str {
        &self.instance_reference
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}
