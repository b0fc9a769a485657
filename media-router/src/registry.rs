//! Router-wide id resolution
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use parking_lot::Mutex;
use std::collections::HashMap;

use crate::data_producer::DataProducer;
use crate::producer::Producer;

/// Live producers and data producers of one Router, by id
///
/// Transports insert on creation and remove on closure; consumers and RTP
/// observers resolve foreign ids through it.
#[derive(Default)]
pub struct EntityRegistry {
    producers: Mutex<HashMap<String, Producer>>,
    data_producers: Mutex<HashMap<String, DataProducer>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn producer(&self, producer_id: &str) -> Option<Producer> {
        self.producers.lock().get(producer_id).cloned()
    }

    pub fn data_producer(&self, data_producer_id: &str) -> Option<DataProducer> {
        self.data_producers.lock().get(data_producer_id).cloned()
    }

    pub(crate) fn insert_producer(&self, producer: Producer) {
        self.producers
            .lock()
            .insert(producer.id().to_string(), producer);
    }

    pub(crate) fn remove_producer(&self, producer_id: &str) -> Option<Producer> {
        self.producers.lock().remove(producer_id)
    }

    pub(crate) fn insert_data_producer(&self, data_producer: DataProducer) {
        self.data_producers
            .lock()
            .insert(data_producer.id().to_string(), data_producer);
    }

    pub(crate) fn remove_data_producer(&self, data_producer_id: &str) -> Option<DataProducer> {
        self.data_producers.lock().remove(data_producer_id)
    }

    pub(crate) fn clear(&self) {
        self.producers.lock().clear();
        self.data_producers.lock().clear();
    }

    pub fn producer_count(&self) -> usize {
        self.producers.lock().len()
    }

    pub fn data_producer_count(&self) -> usize {
        self.data_producers.lock().len()
    }
}
