use crate::broker::RelayHandle;
use crate::wire::InstanceId;
use layerscope_core::{EngineEvent, ObserverFn};
use std::sync::Arc;

/// Observer that forwards every engine event to the relay under
/// `instance_id`. Never blocks the append call it runs inside.
pub fn reporter_observer(handle: RelayHandle, instance_id: impl Into<InstanceId>) -> ObserverFn {
    let instance_id = instance_id.into();
    Arc::new(move |event: &EngineEvent| {
        handle.report(instance_id.clone(), event.clone());
    })
}
