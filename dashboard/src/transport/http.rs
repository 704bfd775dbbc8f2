use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;

use plant_common::{
    decode_reading, wall_clock_ms, Ack, EncodedCommand, FieldNames, HttpConfig, OperatorReference,
    Reading, TransportError, TransportKind,
};

use super::Transport;

pub struct HttpTransport {
    client: Client,
    data_url: String,
    command_url: String,
    fields: FieldNames,
    reference: Arc<OperatorReference>,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig, reference: Arc<OperatorReference>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            client,
            data_url: config.data_url(),
            command_url: config.command_url(),
            fields: config.fields.clone(),
            reference,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn fetch_latest(&self) -> Result<Reading, TransportError> {
        let response = self
            .client
            .get(&self.data_url)
            .send()
            .await
            .map_err(unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::BadStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(unreachable)?;
        decode_reading(&body, &self.fields, self.reference.get(), wall_clock_ms())
    }

    async fn send(&self, command: &EncodedCommand) -> Result<Ack, TransportError> {
        let response = self
            .client
            .post(&self.command_url)
            .json(command)
            .send()
            .await
            .map_err(unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::BadStatus(status.as_u16()));
        }

        Ok(Ack {
            kind: command.kind,
            wire: command.to_text(),
            status: Some(status.as_u16()),
        })
    }
}

fn unreachable(err: reqwest::Error) -> TransportError {
    TransportError::Unreachable(err.to_string())
}
