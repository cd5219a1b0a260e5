/**
 * Lock Bridge Example
 *
 * Pairs a simulated Tuya lock with an in-memory endpoint and host, feeds it a
 * datapoint report and locks it again through the capability surface.
 *
 * Run with `RUST_LOG=debug` to see the raw frames.
 */
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use zigtuya::cluster::{AttributeValue, ClusterId, ReportingConfig, ZclCommand};
use zigtuya::protocol::{DataType, Datapoint, DpFrame};
use zigtuya::{
    CapabilityHost, CapabilityValue, DeviceSettings, Driver, Result, TuyaCommand, ZclEndpoint,
    ZclEvent, catalog,
};

struct PrintingEndpoint;

#[async_trait]
impl ZclEndpoint for PrintingEndpoint {
    fn id(&self) -> u8 {
        1
    }

    fn clusters(&self) -> BTreeSet<ClusterId> {
        [ClusterId::BASIC, ClusterId::TUYA].into()
    }

    fn controller_ieee(&self) -> Option<u64> {
        Some(0x00_12_4B_00_1C_DD_27_0A)
    }

    async fn bind(&self, cluster: ClusterId) -> Result<()> {
        println!("[ZCL] bind {}", cluster);
        Ok(())
    }

    async fn configure_reporting(
        &self,
        cluster: ClusterId,
        attribute: u16,
        _config: ReportingConfig,
    ) -> Result<()> {
        println!("[ZCL] configure reporting {} 0x{:04X}", cluster, attribute);
        Ok(())
    }

    async fn read_attribute(&self, _cluster: ClusterId, _attribute: u16) -> Result<AttributeValue> {
        Ok(AttributeValue::Int(0))
    }

    async fn write_attribute(
        &self,
        cluster: ClusterId,
        attribute: u16,
        value: AttributeValue,
    ) -> Result<()> {
        println!("[ZCL] write {} 0x{:04X} = {:?}", cluster, attribute, value);
        Ok(())
    }

    async fn send_command(&self, command: ZclCommand) -> Result<()> {
        println!("[ZCL] {:?}", command);
        Ok(())
    }

    async fn send_tuya(&self, command: TuyaCommand, payload: Vec<u8>) -> Result<()> {
        println!("[TUYA] {:?} {}", command, hex::encode(payload));
        Ok(())
    }
}

struct PrintingHost;

#[async_trait]
impl CapabilityHost for PrintingHost {
    fn has_capability(&self, capability: &str) -> bool {
        matches!(capability, "locked" | "measure_battery")
    }

    async fn set_capability_value(&self, capability: &str, value: CapabilityValue) -> Result<()> {
        println!("[HOST] {} = {}", capability, value);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    println!("--- zigtuya - Lock Bridge ---");

    let driver = Driver::new(catalog::by_name(catalog::LOCK)?);
    let stream = driver.stream();
    tokio::pin!(stream);

    driver
        .add(
            "front-door",
            Arc::new(PrintingEndpoint),
            Arc::new(PrintingHost),
            DeviceSettings::default(),
        )
        .await?;

    // 1. Device reports: unlocked, battery 87%
    let payload = DpFrame {
        seqno: 0,
        datapoints: vec![
            Datapoint::new(1, DataType::Bool, vec![0x00]),
            Datapoint::new(3, DataType::Value, 87i32.to_be_bytes().to_vec()),
        ],
    }
    .pack()?;
    driver
        .handle_event(
            "front-door",
            ZclEvent::TuyaFrame {
                command: TuyaCommand::DataReport,
                payload,
            },
        )
        .await?;

    // 2. User locks the door
    driver.set_capability("front-door", "locked", true).await?;

    // 3. Drain the merged event stream
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), stream.next()).await
    {
        println!(
            "[EVENT] {}: {} = {}",
            event.device_id, event.capability, event.value
        );
    }

    driver.shutdown().await;
    println!("[INFO] Example finished.");
    Ok(())
}
