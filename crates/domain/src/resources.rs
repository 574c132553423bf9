use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务资源需求
///
/// CPU 以小数核数计，内存和磁盘以字节计。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub cpu_cores: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub network_bandwidth: u64,
    pub gpu_cores: u32,
    pub gpu_memory_bytes: u64,

    #[serde(default)]
    pub required_features: Vec<String>,
    #[serde(default)]
    pub preferred_region: Option<String>,
    /// 需要避开的节点ID
    #[serde(default)]
    pub anti_affinity: Vec<String>,
}

impl ResourceRequirement {
    pub fn new(cpu_cores: f64, memory_bytes: u64, disk_bytes: u64) -> Self {
        Self {
            cpu_cores,
            memory_bytes,
            disk_bytes,
            ..Self::default()
        }
    }

    pub fn with_gpu(mut self, gpu_cores: u32, gpu_memory_bytes: u64) -> Self {
        self.gpu_cores = gpu_cores;
        self.gpu_memory_bytes = gpu_memory_bytes;
        self
    }

    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.required_features = features.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// 节点容量
///
/// 可用容量在任务分配时扣减，任务结束时归还，始终不超过总容量。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub total_cpu_cores: f64,
    pub total_memory_bytes: u64,
    pub total_disk_bytes: u64,
    pub total_gpu_cores: u32,
    pub total_gpu_memory_bytes: u64,

    pub available_cpu_cores: f64,
    pub available_memory_bytes: u64,
    pub available_disk_bytes: u64,
    pub available_gpu_cores: u32,
    pub available_gpu_memory_bytes: u64,

    #[serde(default)]
    pub supported_features: Vec<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
}

impl NodeCapacity {
    /// 创建一个完全空闲的节点容量
    pub fn new(cpu_cores: f64, memory_bytes: u64, disk_bytes: u64) -> Self {
        Self {
            total_cpu_cores: cpu_cores,
            total_memory_bytes: memory_bytes,
            total_disk_bytes: disk_bytes,
            available_cpu_cores: cpu_cores,
            available_memory_bytes: memory_bytes,
            available_disk_bytes: disk_bytes,
            ..Self::default()
        }
    }

    pub fn with_gpu(mut self, gpu_cores: u32, gpu_memory_bytes: u64) -> Self {
        self.total_gpu_cores = gpu_cores;
        self.available_gpu_cores = gpu_cores;
        self.total_gpu_memory_bytes = gpu_memory_bytes;
        self.available_gpu_memory_bytes = gpu_memory_bytes;
        self
    }

    pub fn with_location(mut self, region: &str, zone: &str) -> Self {
        self.region = region.to_string();
        self.zone = zone.to_string();
        self
    }

    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.supported_features = features.iter().map(|f| f.to_string()).collect();
        self
    }

    /// 将剩余容量截断到总容量
    pub fn clamp_to_total(&mut self) {
        self.available_cpu_cores = self.available_cpu_cores.min(self.total_cpu_cores).max(0.0);
        self.available_memory_bytes = self.available_memory_bytes.min(self.total_memory_bytes);
        self.available_disk_bytes = self.available_disk_bytes.min(self.total_disk_bytes);
        self.available_gpu_cores = self.available_gpu_cores.min(self.total_gpu_cores);
        self.available_gpu_memory_bytes = self
            .available_gpu_memory_bytes
            .min(self.total_gpu_memory_bytes);
    }

    /// 检查剩余容量能否满足需求
    pub fn can_satisfy(&self, requirement: &ResourceRequirement) -> bool {
        self.available_cpu_cores >= requirement.cpu_cores
            && self.available_memory_bytes >= requirement.memory_bytes
            && self.available_disk_bytes >= requirement.disk_bytes
            && self.available_gpu_cores >= requirement.gpu_cores
            && self.available_gpu_memory_bytes >= requirement.gpu_memory_bytes
    }

    /// 预留资源，容量不足时不做任何修改并返回false
    pub fn reserve(&mut self, requirement: &ResourceRequirement) -> bool {
        if !self.can_satisfy(requirement) {
            return false;
        }

        self.available_cpu_cores -= requirement.cpu_cores;
        self.available_memory_bytes -= requirement.memory_bytes;
        self.available_disk_bytes -= requirement.disk_bytes;
        self.available_gpu_cores -= requirement.gpu_cores;
        self.available_gpu_memory_bytes -= requirement.gpu_memory_bytes;
        true
    }

    /// 归还资源，截断到总容量
    pub fn release(&mut self, requirement: &ResourceRequirement) {
        self.available_cpu_cores =
            (self.available_cpu_cores + requirement.cpu_cores).min(self.total_cpu_cores);
        self.available_memory_bytes = self
            .available_memory_bytes
            .saturating_add(requirement.memory_bytes)
            .min(self.total_memory_bytes);
        self.available_disk_bytes = self
            .available_disk_bytes
            .saturating_add(requirement.disk_bytes)
            .min(self.total_disk_bytes);
        self.available_gpu_cores = self
            .available_gpu_cores
            .saturating_add(requirement.gpu_cores)
            .min(self.total_gpu_cores);
        self.available_gpu_memory_bytes = self
            .available_gpu_memory_bytes
            .saturating_add(requirement.gpu_memory_bytes)
            .min(self.total_gpu_memory_bytes);
    }

    pub fn cpu_utilization(&self) -> f64 {
        if self.total_cpu_cores <= 0.0 {
            return 0.0;
        }
        (self.total_cpu_cores - self.available_cpu_cores) / self.total_cpu_cores
    }

    pub fn memory_utilization(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 0.0;
        }
        (self.total_memory_bytes - self.available_memory_bytes) as f64
            / self.total_memory_bytes as f64
    }

    /// 假设分配该任务后的 (CPU, 内存) 利用率
    pub fn projected_utilization(&self, requirement: &ResourceRequirement) -> (f64, f64) {
        let cpu = if self.total_cpu_cores > 0.0 {
            (self.total_cpu_cores - self.available_cpu_cores + requirement.cpu_cores)
                / self.total_cpu_cores
        } else {
            1.0
        };
        let memory = if self.total_memory_bytes > 0 {
            (self.total_memory_bytes - self.available_memory_bytes + requirement.memory_bytes)
                as f64
                / self.total_memory_bytes as f64
        } else {
            1.0
        };
        (cpu, memory)
    }
}

/// 节点上报的资源使用指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,

    pub cpu_usage_percent: f64,
    pub cpu_cores: u32,
    pub load_average: f64,

    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub memory_usage_percent: f64,

    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub disk_usage_percent: f64,

    pub network_in_bytes: u64,
    pub network_out_bytes: u64,
    pub network_latency_ms: f64,

    #[serde(default)]
    pub gpu_usage_percent: f64,
}

impl ResourceMetrics {
    pub fn new(node_id: &str, cpu_percent: f64, memory_percent: f64, disk_percent: f64) -> Self {
        Self {
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
            cpu_usage_percent: cpu_percent,
            memory_usage_percent: memory_percent,
            disk_usage_percent: disk_percent,
            ..Self::default()
        }
    }

    /// 负载分: 0.4·CPU + 0.4·内存 + 0.2·磁盘，各项为0到1之间的利用率
    pub fn load_score(&self) -> f64 {
        let cpu = (self.cpu_usage_percent / 100.0).clamp(0.0, 1.0);
        let memory = (self.memory_usage_percent / 100.0).clamp(0.0, 1.0);
        let disk = (self.disk_usage_percent / 100.0).clamp(0.0, 1.0);
        cpu * 0.4 + memory * 0.4 + disk * 0.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_reserve_and_release() {
        let mut capacity = NodeCapacity::new(8.0, 16 * GB, 100 * GB);
        let requirement = ResourceRequirement::new(2.5, 4 * GB, 10 * GB);

        assert!(capacity.reserve(&requirement));
        assert_eq!(capacity.available_cpu_cores, 5.5);
        assert_eq!(capacity.available_memory_bytes, 12 * GB);

        capacity.release(&requirement);
        assert_eq!(capacity.available_cpu_cores, 8.0);
        assert_eq!(capacity.available_memory_bytes, 16 * GB);
        assert_eq!(capacity.available_disk_bytes, 100 * GB);
    }

    #[test]
    fn test_reserve_refuses_oversubscription() {
        let mut capacity = NodeCapacity::new(2.0, 4 * GB, 10 * GB);
        let requirement = ResourceRequirement::new(1.5, GB, GB);

        assert!(capacity.reserve(&requirement));
        assert!(!capacity.reserve(&requirement));
        assert_eq!(capacity.available_cpu_cores, 0.5);
        assert_eq!(capacity.available_memory_bytes, 3 * GB);
    }

    #[test]
    fn test_release_never_exceeds_total() {
        let mut capacity = NodeCapacity::new(4.0, 8 * GB, 10 * GB);
        capacity.release(&ResourceRequirement::new(2.0, GB, GB));
        assert_eq!(capacity.available_cpu_cores, 4.0);
        assert_eq!(capacity.available_memory_bytes, 8 * GB);
        assert_eq!(capacity.available_disk_bytes, 10 * GB);
    }

    #[test]
    fn test_clamp_to_total() {
        let mut capacity = NodeCapacity::new(4.0, 8 * GB, 10 * GB).with_gpu(1, 8 * GB);
        capacity.available_cpu_cores = 6.0;
        capacity.available_memory_bytes = 12 * GB;
        capacity.available_gpu_cores = 3;
        capacity.clamp_to_total();
        assert_eq!(capacity.available_cpu_cores, 4.0);
        assert_eq!(capacity.available_memory_bytes, 8 * GB);
        assert_eq!(capacity.available_disk_bytes, 10 * GB);
        assert_eq!(capacity.available_gpu_cores, 1);
    }

    #[test]
    fn test_gpu_requirement() {
        let mut capacity = NodeCapacity::new(8.0, 16 * GB, 100 * GB).with_gpu(1, 8 * GB);
        let requirement = ResourceRequirement::new(1.0, GB, GB).with_gpu(2, GB);
        assert!(!capacity.can_satisfy(&requirement));
        assert!(capacity.reserve(&ResourceRequirement::new(1.0, GB, GB).with_gpu(1, GB)));
        assert_eq!(capacity.available_gpu_cores, 0);
    }

    #[test]
    fn test_projected_utilization() {
        let mut capacity = NodeCapacity::new(4.0, 4 * GB, 10 * GB);
        capacity.reserve(&ResourceRequirement::new(1.0, GB, 0));
        let (cpu, memory) = capacity.projected_utilization(&ResourceRequirement::new(1.0, GB, 0));
        assert!((cpu - 0.5).abs() < f64::EPSILON);
        assert!((memory - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_score_weights() {
        let metrics = ResourceMetrics::new("node-1", 50.0, 50.0, 100.0);
        assert!((metrics.load_score() - 0.6).abs() < 1e-9);

        let saturated = ResourceMetrics::new("node-1", 150.0, 100.0, 100.0);
        assert!((saturated.load_score() - 1.0).abs() < 1e-9);
    }
}
