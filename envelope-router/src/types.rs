use std::fmt;

use rdkafka::topic_partition_list::TopicPartitionListElem;
use rdkafka::TopicPartitionList;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: impl Into<String>, partition_number: i32) -> Self {
        Self {
            topic: topic.into(),
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition_number)
    }
}

impl From<TopicPartitionListElem<'_>> for Partition {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::new(elem.topic(), elem.partition())
    }
}

pub fn partitions_from_list(list: &TopicPartitionList) -> Vec<Partition> {
    list.elements().into_iter().map(Partition::from).collect()
}

pub fn partitions_to_list(partitions: &[Partition]) -> TopicPartitionList {
    let mut list = TopicPartitionList::with_capacity(partitions.len());
    for partition in partitions {
        list.add_partition(partition.topic(), partition.partition_number());
    }
    list
}

/// Renders partitions as `[topic:0, topic:1]` for log lines.
pub fn format_partitions(partitions: &[Partition]) -> String {
    let rendered: Vec<String> = partitions.iter().map(Partition::to_string).collect();
    format!("[{}]", rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_list_conversions() {
        let partitions = vec![Partition::new("orders", 0), Partition::new("orders", 1)];

        let list = partitions_to_list(&partitions);
        assert_eq!(list.count(), 2);

        assert_eq!(partitions_from_list(&list), partitions);
    }

    #[test]
    fn test_format_partitions() {
        assert_eq!(format_partitions(&[]), "[]");
        assert_eq!(
            format_partitions(&[Partition::new("orders", 0), Partition::new("refunds", 3)]),
            "[orders:0, refunds:3]"
        );
    }
}
