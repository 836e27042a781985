//! Assembles routable protocol commands from translated requests.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::codec::Codec;
use crate::directory::Directory;
use crate::error::ExecutionError;
use crate::policy::CompletionStrategy;
use crate::types::command::CommandRequest;
use crate::types::metadata::apply_device_config;
use crate::types::protocol::{Envelope, ProtocolMessage, ProtocolPart};
use crate::types::task::Task;

/// Name of the task output variable a correlated response completes into.
pub const OUTPUT_NAME: &str = "result";

/// A routable command: the broker topic plus the envelope to publish there.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    /// Protocol handler topic.
    pub topic: String,
    /// The envelope to serialize onto that topic.
    pub envelope: Envelope,
}

/// Resolves command targets through the directory and assembles protocol
/// envelopes, formatting each declared service input through the codec.
pub struct CommandBuilder {
    directory: Arc<dyn Directory>,
    codec: Arc<dyn Codec>,
    worker_id: String,
    completion_strategy: CompletionStrategy,
}

impl CommandBuilder {
    /// A builder stamping commands with `worker_id` and the configured
    /// completion strategy.
    pub fn new(
        directory: Arc<dyn Directory>,
        codec: Arc<dyn Codec>,
        worker_id: impl Into<String>,
        completion_strategy: CompletionStrategy,
    ) -> Self {
        Self { directory, codec, worker_id: worker_id.into(), completion_strategy }
    }

    /// Turns `request` into a publishable command for `task`.
    ///
    /// The task's tenant acts as the requesting identity for permission
    /// checks and device resolution. A declared service input with no
    /// matching request input is skipped; a matching input that fails to
    /// format aborts the whole command.
    pub async fn build(
        &self,
        task: &Task,
        request: &CommandRequest,
    ) -> Result<OutboundCommand, ExecutionError> {
        let tenant = task.tenant();
        let allowed = self
            .directory
            .check_access(tenant, &request.instance_id)
            .await
            .map_err(resolution)?;
        if !allowed {
            return Err(ExecutionError::Resolution {
                detail: format!(
                    "tenant '{tenant}' may not execute on device '{}'",
                    request.instance_id
                ),
            });
        }
        let device = self
            .directory
            .resolve_device(&request.instance_id, tenant)
            .await
            .map_err(resolution)?;
        let service =
            self.directory.resolve_service(&request.service_id).await.map_err(resolution)?;

        let mut parts = Vec::new();
        for input in &service.inputs {
            let Some(value) = request.inputs.get(&input.name) else { continue };
            let rendered = self
                .codec
                .encode(&device.config, input, value)
                .map_err(|e| ExecutionError::Format {
                    field: input.name.clone(),
                    detail: e.to_string(),
                })?;
            parts.push(ProtocolPart { name: input.segment.clone(), value: rendered });
        }

        let topic = service.protocol.handler_topic.clone();
        if topic.is_empty() {
            return Err(ExecutionError::Routing { service_id: service.id });
        }

        let message = ProtocolMessage {
            worker_id: self.worker_id.clone(),
            completion_strategy: self.completion_strategy,
            device_url: apply_device_config(&device.url, &device.config),
            service_url: apply_device_config(&service.url, &device.config),
            task_id: task.id.clone(),
            device_instance_id: device.id.clone(),
            service_id: service.id.clone(),
            output_name: OUTPUT_NAME.to_string(),
            time: ProtocolMessage::format_time(Utc::now()),
            service: service.clone(),
            protocol_parts: parts,
        };
        let envelope =
            Envelope::new(device.id, service.id, message).map_err(|e| {
                ExecutionError::Format { field: "envelope".into(), detail: e.to_string() }
            })?;
        debug!(
            task_id = %task.id,
            %topic,
            parts = envelope.value.protocol_parts.len(),
            "command assembled"
        );
        Ok(OutboundCommand { topic, envelope })
    }
}

fn resolution(error: crate::directory::DirectoryError) -> ExecutionError {
    ExecutionError::Resolution { detail: error.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::directory::DirectoryError;
    use crate::types::metadata::{
        ConfigEntry, DeviceMetadata, FieldSpec, ProtocolMetadata, ServiceMetadata,
        ValueType, WireFormat,
    };
    use crate::types::value::{VarMap, VarValue};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct FakeDirectory {
        device: DeviceMetadata,
        service: ServiceMetadata,
        allow: bool,
    }

    #[async_trait]
    impl Directory for FakeDirectory {
        async fn resolve_device(
            &self,
            device_id: &str,
            _identity: &str,
        ) -> Result<DeviceMetadata, DirectoryError> {
            if device_id == self.device.id {
                Ok(self.device.clone())
            } else {
                Err(DirectoryError::NotFound { entity: "device", id: device_id.into() })
            }
        }

        async fn resolve_service(
            &self,
            service_id: &str,
        ) -> Result<ServiceMetadata, DirectoryError> {
            if service_id == self.service.id {
                Ok(self.service.clone())
            } else {
                Err(DirectoryError::NotFound { entity: "service", id: service_id.into() })
            }
        }

        async fn check_access(
            &self,
            _identity: &str,
            _resource_id: &str,
        ) -> Result<bool, DirectoryError> {
            Ok(self.allow)
        }
    }

    fn device() -> DeviceMetadata {
        DeviceMetadata {
            id: "d1".into(),
            name: "lamp".into(),
            url: "http://{{host}}/device".into(),
            config: vec![ConfigEntry { name: "host".into(), value: "lamp-3".into() }],
        }
    }

    fn service() -> ServiceMetadata {
        ServiceMetadata {
            id: "s1".into(),
            name: "set level".into(),
            url: "http://{{host}}/level".into(),
            protocol: ProtocolMetadata { id: "p1".into(), handler_topic: "mqtt".into() },
            inputs: vec![FieldSpec {
                name: "level".into(),
                value_type: ValueType::Integer,
                format: WireFormat::Json,
                format_info: None,
                literal: None,
                segment: "body".into(),
            }],
            outputs: vec![],
        }
    }

    fn builder(directory: FakeDirectory) -> CommandBuilder {
        CommandBuilder::new(
            Arc::new(directory),
            Arc::new(JsonCodec),
            "worker-1",
            CompletionStrategy::Pessimistic,
        )
    }

    fn task() -> Task {
        Task { id: "t1".into(), tenant_id: Some("tenant-a".into()), ..Task::default() }
    }

    fn request(inputs: VarMap) -> CommandRequest {
        CommandRequest {
            instance_id: "d1".into(),
            service_id: "s1".into(),
            inputs,
            ..CommandRequest::default()
        }
    }

    #[tokio::test]
    async fn assembles_a_routable_command() {
        let b = builder(FakeDirectory { device: device(), service: service(), allow: true });
        let inputs = VarMap::from([("level".to_string(), VarValue::Int(7))]);
        let command = b.build(&task(), &request(inputs)).await.unwrap();

        assert_eq!(command.topic, "mqtt");
        assert_eq!(command.envelope.device_id, "d1");
        assert_eq!(command.envelope.service_id, "s1");
        let message = &command.envelope.value;
        assert_eq!(message.worker_id, "worker-1");
        assert_eq!(message.task_id, "t1");
        assert_eq!(message.output_name, OUTPUT_NAME);
        assert_eq!(message.device_url, "http://lamp-3/device");
        assert_eq!(message.service_url, "http://lamp-3/level");
        assert_eq!(
            message.protocol_parts,
            vec![ProtocolPart { name: "body".into(), value: "7".into() }]
        );
        assert_eq!(message.service, service());
        assert!(message.time.parse::<i64>().is_ok());
    }

    #[tokio::test]
    async fn denied_permission_is_a_resolution_error() {
        let b = builder(FakeDirectory { device: device(), service: service(), allow: false });
        let err = b.build(&task(), &request(VarMap::new())).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Resolution { .. }));
    }

    #[tokio::test]
    async fn unknown_device_is_a_resolution_error() {
        let b = builder(FakeDirectory { device: device(), service: service(), allow: true });
        let mut r = request(VarMap::new());
        r.instance_id = "ghost".into();
        let err = b.build(&task(), &r).await.unwrap_err();
        match err {
            ExecutionError::Resolution { detail } => assert!(detail.contains("ghost")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_handler_topic_is_a_routing_error() {
        let mut s = service();
        s.protocol.handler_topic = String::new();
        let b = builder(FakeDirectory { device: device(), service: s, allow: true });
        let err = b.build(&task(), &request(VarMap::new())).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Routing { .. }));
    }

    #[tokio::test]
    async fn undeclared_request_inputs_are_ignored() {
        let b = builder(FakeDirectory { device: device(), service: service(), allow: true });
        let inputs = VarMap::from([("unknown".to_string(), VarValue::Int(1))]);
        let command = b.build(&task(), &request(inputs)).await.unwrap();
        assert!(command.envelope.value.protocol_parts.is_empty());
    }

    #[tokio::test]
    async fn failing_field_format_aborts_the_command() {
        let b = builder(FakeDirectory { device: device(), service: service(), allow: true });
        let inputs = VarMap::from([("level".to_string(), VarValue::Map(VarMap::new()))]);
        let err = b.build(&task(), &request(inputs)).await.unwrap_err();
        match err {
            ExecutionError::Format { field, .. } => assert_eq!(field, "level"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn format_failures_take_precedence_over_routing() {
        let mut s = service();
        s.protocol.handler_topic = String::new();
        let b = builder(FakeDirectory { device: device(), service: s, allow: true });
        let inputs = VarMap::from([("level".to_string(), VarValue::Map(VarMap::new()))]);
        let err = b.build(&task(), &request(inputs)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Format { .. }));
    }
}
