// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use std::sync::{Arc, Mutex};

mod util;

use stellarbus_bus::{Bus, Client, Device};
use stellarbus_bus::driver::sim::SimHardwareDriver;
use stellarbus_bus::driver::{HardwareDriver, Role, SharedHandle};
use stellarbus_bus::classes::CcdDevice;
use stellarbus_bus::image::{FitsImage, ImageSink};
use stellarbus_core::property::{Item, ItemValue, NumberValue, Perm, PropertyState, PropertyVector, SwitchRule};
use stellarbus_core::scheduler::Scheduler;

struct RecordingClient {
  id: String,
  defines: Mutex<Vec<PropertyVector>>,
  updates: Mutex<Vec<PropertyVector>>,
  deletes: Mutex<Vec<String>>,
}

impl RecordingClient {
  fn new(id: &str) -> Arc<Self> {
    Arc::new(Self { id: id.to_string(), defines: Mutex::new(vec![]), updates: Mutex::new(vec![]), deletes: Mutex::new(vec![]) })
  }
}

impl Client for RecordingClient {
  fn id(&self) -> &str {
    &self.id
  }
  fn define_property(&self, _device: &str, vector: &PropertyVector) -> stellarbus_core::errors::StellarbusResult {
    self.defines.lock().unwrap().push(vector.clone());
    Ok(())
  }
  fn update_property(&self, _device: &str, vector: &PropertyVector) -> stellarbus_core::errors::StellarbusResult {
    self.updates.lock().unwrap().push(vector.clone());
    Ok(())
  }
  fn delete_property(&self, _device: &str, name: &str) -> stellarbus_core::errors::StellarbusResult {
    self.deletes.lock().unwrap().push(name.to_string());
    Ok(())
  }
}

struct SingleVectorDevice {
  id: String,
  vector: Mutex<PropertyVector>,
}

impl Device for SingleVectorDevice {
  fn id(&self) -> &str {
    &self.id
  }
  fn enumerate_properties(&self) -> Vec<PropertyVector> {
    vec![self.vector.lock().unwrap().clone()]
  }
  fn change_property(&self, bus: &Bus, _client_id: &str, candidate: PropertyVector) -> stellarbus_core::errors::StellarbusResult {
    let mut v = self.vector.lock().unwrap();
    let updates: Vec<_> = candidate.items().iter().map(|i| (i.name().clone(), i.value().clone())).collect();
    v.copy_values(&updates)?;
    v.set_state(PropertyState::Ok);
    let snapshot = v.clone();
    drop(v);
    bus.update_property(&self.id, &snapshot);
    Ok(())
  }
}

#[test]
fn scenario_1_define_then_update() {
  util::setup_logging();
  let bus = Bus::default();
  let client = RecordingClient::new("c1");
  bus.attach_client(client.clone());

  let device = Arc::new(SingleVectorDevice {
    id: "ccd0".into(),
    vector: Mutex::new(PropertyVector::new(
      "ccd0",
      "CCD_EXPOSURE",
      "Main",
      "Exposure",
      Perm::ReadWrite,
      None,
      vec![Item::new("EXPOSURE", "Exposure", ItemValue::Number(NumberValue::new(0.0, 0.0, 3600.0, 0.01)))],
    )),
  });
  bus.attach_device(device.clone()).unwrap();
  assert_eq!(client.defines.lock().unwrap().len(), 1);
  assert_eq!(client.defines.lock().unwrap()[0].name(), "CCD_EXPOSURE");

  let candidate = PropertyVector::new(
    "ccd0",
    "CCD_EXPOSURE",
    "Main",
    "Exposure",
    Perm::ReadWrite,
    None,
    vec![Item::new("EXPOSURE", "Exposure", ItemValue::Number(NumberValue::new(5.0, 0.0, 3600.0, 0.01)))],
  );
  bus.change_property("c1", "ccd0", candidate).unwrap();

  let updates = client.updates.lock().unwrap();
  assert_eq!(updates.len(), 1);
  assert_eq!(updates[0].state(), &PropertyState::Ok);
  let item = updates[0].item("EXPOSURE").unwrap();
  assert!(matches!(item.value(), ItemValue::Number(n) if n.value() == 5.0));
}

#[test]
fn scenario_2_switch_rule_enforcement() {
  let bus = Bus::default();
  let client = RecordingClient::new("c1");
  bus.attach_client(client.clone());

  let device = Arc::new(SingleVectorDevice {
    id: "wheel0".into(),
    vector: Mutex::new(PropertyVector::new(
      "wheel0",
      "MODE",
      "Main",
      "Mode",
      Perm::ReadWrite,
      Some(SwitchRule::OneOfMany),
      vec![
        Item::new("A", "A", ItemValue::Switch(true)),
        Item::new("B", "B", ItemValue::Switch(false)),
        Item::new("C", "C", ItemValue::Switch(false)),
      ],
    )),
  });
  bus.attach_device(device.clone()).unwrap();

  let candidate = PropertyVector::new(
    "wheel0",
    "MODE",
    "Main",
    "Mode",
    Perm::ReadWrite,
    Some(SwitchRule::OneOfMany),
    vec![Item::new("B", "B", ItemValue::Switch(true))],
  );
  bus.change_property("c1", "wheel0", candidate).unwrap();

  let updates = client.updates.lock().unwrap();
  let final_vector = updates.last().unwrap();
  assert!(matches!(final_vector.item("A").unwrap().value(), ItemValue::Switch(false)));
  assert!(matches!(final_vector.item("B").unwrap().value(), ItemValue::Switch(true)));
  assert!(matches!(final_vector.item("C").unwrap().value(), ItemValue::Switch(false)));
}

#[test]
fn scenario_4_hotplug_detach_emits_del_property_for_every_vector() {
  let bus = Bus::default();
  let client = RecordingClient::new("c1");
  bus.attach_client(client.clone());

  let device = Arc::new(SingleVectorDevice {
    id: "ccd0".into(),
    vector: Mutex::new(PropertyVector::new(
      "ccd0",
      "CCD_EXPOSURE",
      "Main",
      "Exposure",
      Perm::ReadWrite,
      None,
      vec![Item::new("EXPOSURE", "Exposure", ItemValue::Number(NumberValue::new(0.0, 0.0, 3600.0, 0.01)))],
    )),
  });
  bus.attach_device(device).unwrap();
  bus.detach_device("ccd0").unwrap();

  assert_eq!(client.deletes.lock().unwrap().as_slice(), &["CCD_EXPOSURE".to_string()]);
  assert!(bus.device("ccd0").is_none());
}

#[test]
fn scenario_5_multi_role_shared_handle_open_close_counts() {
  let driver = Arc::new(SimHardwareDriver::new());
  driver.plug("hw0", vec![Role::Camera, Role::Guider]);
  let handle = Arc::new(SharedHandle::new("hw0", driver.clone() as Arc<dyn HardwareDriver>));

  handle.connect_role().unwrap(); // camera
  assert!(handle.is_open());
  handle.connect_role().unwrap(); // guider
  assert!(handle.is_open());

  handle.disconnect_role(); // camera disconnects
  assert!(handle.is_open());
  handle.disconnect_role(); // guider disconnects
  assert!(!handle.is_open());
}

struct NullSink;
impl ImageSink for NullSink {
  fn accept(&self, _device: &str, _image: FitsImage) {}
}

#[tokio::test]
async fn scenario_6_abort_during_exposure_delivers_no_image() {
  let driver = Arc::new(SimHardwareDriver::new());
  driver.plug("hw0", vec![Role::Camera]);
  let handle = Arc::new(SharedHandle::new("hw0", driver as Arc<dyn HardwareDriver>));
  let ccd = CcdDevice::new("hw0.camera", handle, Arc::new(NullSink), Scheduler::new());
  let bus = Bus::default();
  bus.attach_device(ccd.clone()).unwrap();

  let exposure = PropertyVector::new(
    "hw0.camera",
    "CCD_EXPOSURE",
    "Main",
    "Exposure",
    Perm::ReadWrite,
    None,
    vec![Item::new("EXPOSURE", "Exposure", ItemValue::Number(NumberValue::new(5.0, 0.0, 3600.0, 0.01)))],
  );
  bus.change_property("c1", "hw0.camera", exposure).unwrap();

  let abort = PropertyVector::new(
    "hw0.camera",
    "CCD_ABORT_EXPOSURE",
    "Main",
    "Abort",
    Perm::WriteOnly,
    Some(SwitchRule::AtMostOne),
    vec![Item::new("ABORT", "Abort", ItemValue::Switch(true))],
  );
  let result = bus.change_property("c1", "hw0.camera", abort);
  assert!(result.is_ok());

  tokio::time::sleep(std::time::Duration::from_millis(20)).await;
}
