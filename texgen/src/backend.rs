use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use image::RgbImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

use base::defs::{Error, ErrorKind::*, Result};
use base::util::sync::CancelToken;

use crate::config::{BackendConfig, IpAdapterConfig, LoraUnit, RunConfig};

// Generated images are PNG payloads; cap what we are willing to buffer.
const MAX_RESULT_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Clone, Debug, Serialize)]
pub struct ControlNetRequest {
    pub kind: String,
    pub model: String,
    pub image: PathBuf,
    pub strength: f64,
    pub start_percent: f64,
    pub end_percent: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoraRequest {
    pub model: String,
    pub model_strength: f64,
    pub clip_strength: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct IpAdapterRequest {
    pub reference: PathBuf,
    pub weight_type: String,
    pub strength: f64,
    pub start_percent: f64,
    pub end_percent: f64,
}

/// One self-contained generation call. Guidance, mask and init images
/// are exchanged as files under the run's output directory.
#[derive(Clone, Debug, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: u64,
    pub steps: u32,
    pub cfg: f64,
    pub sampler: String,
    pub scheduler: String,
    pub denoise: f64,
    pub width: u32,
    pub height: u32,
    pub init_image: Option<PathBuf>,
    pub mask_image: Option<PathBuf>,
    pub control_nets: Vec<ControlNetRequest>,
    pub loras: Vec<LoraRequest>,
    pub ip_adapter: Option<IpAdapterRequest>,
}

/// Rendered guidance maps saved to disk for one backend call.
pub struct GuidancePaths {
    pub depth: PathBuf,
    pub normal: PathBuf,
    pub edge: PathBuf,
}

impl GuidancePaths {
    fn for_kind(&self, kind: &str) -> Option<&PathBuf> {
        match kind {
            "depth" => Some(&self.depth),
            "normal" => Some(&self.normal),
            "edge" => Some(&self.edge),
            _ => None,
        }
    }
}

/// Fixed seed when configured, fresh random one per call otherwise.
pub fn resolve_seed(config: &RunConfig) -> u64 {
    match config.sampler.seed {
        Some(seed) => seed,
        None => rand::thread_rng().gen::<u32>() as u64,
    }
}

pub fn build_request(
    config: &RunConfig,
    prompt: String,
    seed: u64,
    width: u32,
    height: u32,
    guidance: Option<&GuidancePaths>,
    mask_image: Option<PathBuf>,
    init_image: Option<PathBuf>,
) -> GenerationRequest {
    let sampler = &config.sampler;

    let control_nets = match guidance {
        Some(paths) => sampler
            .control_nets
            .iter()
            .filter_map(|unit| {
                paths.for_kind(&unit.kind).map(|image| ControlNetRequest {
                    kind: unit.kind.clone(),
                    model: unit.model.clone(),
                    image: image.clone(),
                    strength: unit.strength,
                    start_percent: unit.start_percent,
                    end_percent: unit.end_percent,
                })
            })
            .collect(),
        None => vec![],
    };

    let loras = sampler
        .loras
        .iter()
        .map(|unit: &LoraUnit| LoraRequest {
            model: unit.model.clone(),
            model_strength: unit.model_strength,
            clip_strength: unit.clip_strength,
        })
        .collect();

    let ip_adapter =
        sampler.ip_adapter.as_ref().map(|ip: &IpAdapterConfig| {
            IpAdapterRequest {
                reference: ip.reference.clone(),
                weight_type: ip.weight_type.clone(),
                strength: ip.strength,
                start_percent: ip.start_percent,
                end_percent: ip.end_percent,
            }
        });

    GenerationRequest {
        prompt,
        negative_prompt: config.negative_prompt.clone(),
        seed,
        steps: sampler.steps,
        cfg: sampler.cfg,
        sampler: sampler.sampler.clone(),
        scheduler: sampler.scheduler.clone(),
        denoise: sampler.denoise,
        width,
        height,
        init_image,
        mask_image,
        control_nets,
        loras,
        ip_adapter,
    }
}

/// Streaming progress, forwarded upward for observability only; never
/// part of any blending decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressEvent {
    Queued,
    Sampling { step: u32, total: u32 },
    Finished,
}

pub type ProgressSink<'a> = dyn FnMut(ProgressEvent) + 'a;

/// The external image-generation collaborator. A call suspends the
/// caller until a result or an explicit failure arrives; cancellation
/// aborts mid-flight and discards any late result.
pub trait GenerationService: Sync {
    /// Cheap connectivity check, run before the first view so that an
    /// unreachable backend fails the run before any work happens.
    fn probe(&self) -> Result<()>;

    fn generate(
        &self,
        request: &GenerationRequest,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RgbImage>;
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct ProgressResponse {
    status: String,
    #[serde(default)]
    step: u32,
    #[serde(default)]
    total: u32,
    #[serde(default)]
    detail: Option<String>,
}

pub struct HttpGenerationService {
    agent: ureq::Agent,
    address: String,
    poll_interval: Duration,
}

impl HttpGenerationService {
    pub fn new(config: &BackendConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_sec))
            .build();
        HttpGenerationService {
            agent,
            address: config.address.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.address, path)
    }

    fn backend_err<E>(action: &str, err: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::with_source(
            Backend,
            format!("generation backend failed to {}", action),
            err,
        )
    }

    fn interrupt(&self, id: &str) {
        // Best effort; the result is discarded either way.
        let _ = self.agent.post(&self.url(&format!("interrupt/{}", id))).call();
    }
}

impl GenerationService for HttpGenerationService {
    fn probe(&self) -> Result<()> {
        self.agent.get(&self.url("health")).call().map_err(|e| {
            Error::with_source(
                Configuration,
                format!("generation backend unreachable at '{}'", self.address),
                e,
            )
        })?;
        Ok(())
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RgbImage> {
        let body = serde_json::to_value(request).map_err(|e| {
            Error::with_source(
                MalformedData,
                "failed to serialize generation request".to_string(),
                e,
            )
        })?;

        let submit: SubmitResponse = self
            .agent
            .post(&self.url("generate"))
            .send_json(body)
            .map_err(|e| Self::backend_err("accept request", e))?
            .into_json()
            .map_err(|e| Self::backend_err("return job id", e))?;

        loop {
            if cancel.is_cancelled() {
                self.interrupt(&submit.id);
                cancel.ensure_active()?;
            }

            let status: ProgressResponse = self
                .agent
                .get(&self.url(&format!("progress/{}", submit.id)))
                .call()
                .map_err(|e| Self::backend_err("report progress", e))?
                .into_json()
                .map_err(|e| Self::backend_err("report progress", e))?;

            match status.status.as_str() {
                "queued" => progress(ProgressEvent::Queued),
                "running" => progress(ProgressEvent::Sampling {
                    step: status.step,
                    total: status.total,
                }),
                "done" => {
                    progress(ProgressEvent::Finished);
                    break;
                }
                other => {
                    let detail = status
                        .detail
                        .unwrap_or_else(|| other.to_string());
                    return Err(Error::new(
                        Backend,
                        format!("generation failed: {}", detail),
                    ));
                }
            }

            std::thread::sleep(self.poll_interval);
        }

        // A cancellation racing the final poll still discards the result.
        cancel.ensure_active()?;

        let mut data = Vec::new();
        self.agent
            .get(&self.url(&format!("result/{}", submit.id)))
            .call()
            .map_err(|e| Self::backend_err("deliver result", e))?
            .into_reader()
            .take(MAX_RESULT_BYTES)
            .read_to_end(&mut data)
            .map_err(|e| Self::backend_err("deliver result", e))?;

        let image = image::load_from_memory(&data).map_err(|e| {
            Error::with_source(
                Backend,
                "generation result is not a decodable image".to_string(),
                e,
            )
        })?;
        Ok(image.into_rgb8())
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    use std::sync::Mutex;

    use base::util::test::MethodMock;

    /// Backend double: replays prepared images or failures and records
    /// the requests it received.
    pub struct MockGenerationService {
        pub generate_mock: Mutex<MethodMock<GenerationRequest, Result<RgbImage>>>,
    }

    impl MockGenerationService {
        pub fn new() -> Self {
            MockGenerationService {
                generate_mock: Mutex::new(MethodMock::new()),
            }
        }

        pub fn push_image(&self, image: RgbImage) {
            self.generate_mock.lock().unwrap().rets.push(Ok(image));
        }

        pub fn push_failure(&self, description: &str) {
            self.generate_mock
                .lock()
                .unwrap()
                .rets
                .push(Err(Error::new(Backend, description.to_string())));
        }

        pub fn take_requests(&self) -> Vec<GenerationRequest> {
            std::mem::take(&mut self.generate_mock.lock().unwrap().args)
        }
    }

    impl GenerationService for MockGenerationService {
        fn probe(&self) -> Result<()> {
            Ok(())
        }

        fn generate(
            &self,
            request: &GenerationRequest,
            progress: &mut ProgressSink,
            cancel: &CancelToken,
        ) -> Result<RgbImage> {
            cancel.ensure_active()?;
            progress(ProgressEvent::Finished);
            self.generate_mock.lock().unwrap().call(request.clone())
        }
    }

    fn test_config() -> RunConfig {
        crate::config::test::new_run_config(crate::config::Mode::Separate, 1)
    }

    #[test]
    fn test_resolve_seed_fixed() {
        let mut config = test_config();
        config.sampler.seed = Some(42);
        assert_eq!(resolve_seed(&config), 42);
    }

    #[test]
    fn test_resolve_seed_randomized() {
        let config = test_config();
        let seeds: Vec<u64> =
            (0..8).map(|_| resolve_seed(&config)).collect();
        assert!(seeds.iter().any(|&s| s != seeds[0]));
    }

    #[test]
    fn test_build_request_maps_control_nets() {
        let mut config = test_config();
        config.sampler.control_nets = vec![
            crate::config::ControlNetUnit {
                kind: "depth".to_string(),
                model: "cn_depth.safetensors".to_string(),
                strength: 0.5,
                start_percent: 0.0,
                end_percent: 1.0,
            },
            crate::config::ControlNetUnit {
                kind: "edge".to_string(),
                model: "cn_canny.safetensors".to_string(),
                strength: 0.8,
                start_percent: 0.0,
                end_percent: 0.5,
            },
        ];

        let guidance = GuidancePaths {
            depth: PathBuf::from("out/view_0_depth.png"),
            normal: PathBuf::from("out/view_0_normal.png"),
            edge: PathBuf::from("out/view_0_edge.png"),
        };
        let request = build_request(
            &config,
            "a stone wall".to_string(),
            7,
            512,
            512,
            Some(&guidance),
            None,
            None,
        );

        assert_eq!(request.seed, 7);
        assert_eq!(request.control_nets.len(), 2);
        assert_eq!(
            request.control_nets[0].image,
            PathBuf::from("out/view_0_depth.png")
        );
        assert_eq!(
            request.control_nets[1].image,
            PathBuf::from("out/view_0_edge.png")
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["prompt"], "a stone wall");
        assert_eq!(json["control_nets"][1]["strength"], 0.8);
    }

    #[test]
    fn test_mock_service_replays() {
        let service = MockGenerationService::new();
        service.push_image(RgbImage::new(2, 2));

        let config = test_config();
        let request = build_request(
            &config,
            "x".to_string(),
            1,
            2,
            2,
            None,
            None,
            None,
        );

        let mut events = vec![];
        let image = service
            .generate(&request, &mut |e| events.push(e), &CancelToken::new())
            .unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(events, vec![ProgressEvent::Finished]);
        assert_eq!(service.take_requests().len(), 1);
    }

    #[test]
    fn test_transport_errors_carry_backend_kind() {
        let io_err = std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        );
        let err =
            HttpGenerationService::backend_err("deliver result", io_err);
        assert_eq!(err.kind, Backend);
        assert!(err.description.contains("deliver result"));
    }

    #[test]
    fn test_mock_service_cancellation() {
        let service = MockGenerationService::new();
        let config = test_config();
        let request =
            build_request(&config, "x".to_string(), 1, 2, 2, None, None, None);

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = service
            .generate(&request, &mut |_| {}, &cancel)
            .unwrap_err();
        assert_eq!(err.kind, Cancelled);
    }
}
