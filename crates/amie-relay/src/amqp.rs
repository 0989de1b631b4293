//! AMQP 0-9-1 broker implementation on lapin.

use crate::broker::{
    BrokerChannel, BrokerConnector, BrokerSession, Confirm, Delivery, DeliveryStream,
    DeliveryTag, Publication,
};
use crate::error::{RelayError, RelayResult};
use amie_config::{BrokerSettings, Config};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const MESSAGE_LENGTH_HEADER: &str = "message_length";
const PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Opens one connection and one confirm-mode channel per session.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    settings: BrokerSettings,
    write_exchange: String,
    read_queue: String,
}

impl AmqpConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: config.message_queue.clone(),
            write_exchange: config.amie.write_exchange.clone(),
            read_queue: config.read_queue(),
        }
    }

    fn uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: if self.settings.tls {
                AMQPScheme::AMQPS
            } else {
                AMQPScheme::AMQP
            },
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.settings.user.clone(),
                    password: self.settings.password.clone(),
                },
                host: self.settings.host.clone(),
                port: self.settings.port(),
            },
            vhost: self.settings.vhost.clone(),
            query: Default::default(),
        }
    }

    fn properties(&self) -> ConnectionProperties {
        let properties = ConnectionProperties::default();
        match &self.settings.connection_name {
            Some(name) => properties.with_connection_name(name.clone().into()),
            None => properties,
        }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> RelayResult<BrokerSession> {
        info!(
            host = %self.settings.host,
            port = self.settings.port(),
            vhost = %self.settings.vhost,
            tls = self.settings.tls,
            "Connecting to broker"
        );

        let connection = Connection::connect_uri(self.uri(), self.properties()).await?;
        let channel = connection.create_channel().await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        channel
            .basic_qos(self.settings.prefetch, BasicQosOptions::default())
            .await?;

        // Both must already exist; passive declares fail instead of creating.
        channel
            .exchange_declare(
                &self.write_exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    passive: true,
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(
                &self.read_queue,
                QueueDeclareOptions {
                    passive: true,
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let consumer_tag = format!("amie-relay-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &self.read_queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            write_exchange = %self.write_exchange,
            read_queue = %self.read_queue,
            consumer_tag = %consumer_tag,
            prefetch = self.settings.prefetch,
            "Broker session open"
        );

        Ok(BrokerSession {
            channel: Arc::new(AmqpChannel {
                connection,
                channel,
                write_exchange: self.write_exchange.clone(),
                gate: Mutex::new(()),
            }),
            deliveries: Box::new(AmqpDeliveries { consumer }),
        })
    }
}

/// Confirm-mode channel; one operation on the wire at a time.
pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    write_exchange: String,
    gate: Mutex<()>,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn ack(&self, delivery_tag: DeliveryTag) -> RelayResult<()> {
        let _gate = self.gate.lock().await;
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await?;
        Ok(())
    }

    async fn publish(&self, publication: Publication) -> RelayResult<Confirm> {
        let mut headers = FieldTable::default();
        headers.insert(
            MESSAGE_LENGTH_HEADER.into(),
            AMQPValue::LongLongInt(publication.message_length() as i64),
        );
        let properties = BasicProperties::default()
            .with_headers(headers)
            .with_priority(publication.priority)
            .with_delivery_mode(PERSISTENT);

        let _gate = self.gate.lock().await;
        let confirmation = self
            .channel
            .basic_publish(
                &self.write_exchange,
                &publication.routing_key,
                BasicPublishOptions::default(),
                &publication.payload,
                properties,
            )
            .await?
            .await?;

        match confirmation {
            Confirmation::Ack(_) => Ok(Confirm::Ack),
            Confirmation::Nack(_) => Ok(Confirm::Nack),
            Confirmation::NotRequested => Err(RelayError::Protocol(
                "publish confirm not requested on a confirm-mode channel".to_string(),
            )),
        }
    }

    async fn close(&self) -> RelayResult<()> {
        let _gate = self.gate.lock().await;
        if self.channel.status().connected() {
            self.channel.close(REPLY_SUCCESS, "relay session closed").await?;
        }
        if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, "relay session closed")
                .await?;
        }
        debug!("Broker session closed");
        Ok(())
    }
}

struct AmqpDeliveries {
    consumer: Consumer,
}

#[async_trait]
impl DeliveryStream for AmqpDeliveries {
    async fn next_delivery(&mut self) -> Option<RelayResult<Delivery>> {
        let next = self.consumer.next().await?;
        Some(
            next.map(|delivery| Delivery {
                delivery_tag: delivery.delivery_tag,
                payload: delivery.data,
                redelivered: delivery.redelivered,
            })
            .map_err(RelayError::from),
        )
    }
}
