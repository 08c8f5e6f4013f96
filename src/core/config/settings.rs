use super::parsing::{
    env_optional, env_or_default, is_supported_extension, parse_bool, parse_cors_origins,
    parse_environment, parse_extension_list, parse_f64, parse_ocr_languages, parse_store_backend,
    parse_u16, parse_u32, parse_u64,
};
use super::types::{
    AiSettings, ApiSettings, ConfigError, CorsSettings, OcrSettings, PdfSettings, RedisSettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings, StoreBackend,
    StoreSettings, TelemetrySettings, UploadSettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EXAM_GRADER_HOST", "0.0.0.0");
        let port = env_or_default("EXAM_GRADER_PORT", "8000");

        let environment = parse_environment(
            env_optional("EXAM_GRADER_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("EXAM_GRADER_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "AI Exam Grading System");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let prefix = env_or_default("API_PREFIX", "/api");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let llm_api_key = env_or_default("LLM_API_KEY", "");
        let llm_base_url = env_or_default("LLM_BASE_URL", "https://api.openai.com/v1");
        let llm_model = env_or_default("LLM_MODEL", "gpt-4o-mini");
        let parse_max_tokens =
            parse_u32("LLM_PARSE_MAX_TOKENS", env_or_default("LLM_PARSE_MAX_TOKENS", "8192"))?;
        let grade_max_tokens =
            parse_u32("LLM_GRADE_MAX_TOKENS", env_or_default("LLM_GRADE_MAX_TOKENS", "1024"))?;
        let temperature = parse_f64("LLM_TEMPERATURE", env_or_default("LLM_TEMPERATURE", "0.1"))?;
        let request_timeout =
            parse_u64("LLM_REQUEST_TIMEOUT", env_or_default("LLM_REQUEST_TIMEOUT", "30"))?;

        let ocr_base_url = env_or_default("OCR_BASE_URL", "http://localhost:8866");
        let ocr_api_key = env_or_default("OCR_API_KEY", "");
        let ocr_languages = parse_ocr_languages(&env_or_default("OCR_LANGUAGE", "en"));
        let ocr_timeout_seconds =
            parse_u64("OCR_TIMEOUT_SECONDS", env_or_default("OCR_TIMEOUT_SECONDS", "120"))?;

        let rasterizer_bin = env_or_default("PDF_RASTERIZER_BIN", "pdftoppm");
        let max_pages = parse_u32("PDF_MAX_PAGES", env_or_default("PDF_MAX_PAGES", "3"))?;

        let max_upload_size_mb =
            parse_u64("MAX_UPLOAD_SIZE_MB", env_or_default("MAX_UPLOAD_SIZE_MB", "10"))?;
        let allowed_extensions = parse_extension_list(env_optional("ALLOWED_EXTENSIONS"));

        let backend = parse_store_backend(env_optional("STORE_BACKEND"))?;
        let exam_ttl_seconds =
            parse_u64("EXAM_TTL_SECONDS", env_or_default("EXAM_TTL_SECONDS", "86400"))?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let log_level = env_or_default("EXAM_GRADER_LOG_LEVEL", "info");
        let json =
            env_optional("EXAM_GRADER_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, prefix },
            cors: CorsSettings { origins: cors_origins },
            ai: AiSettings {
                api_key: llm_api_key,
                base_url: llm_base_url,
                model: llm_model,
                parse_max_tokens,
                grade_max_tokens,
                temperature,
                request_timeout,
            },
            ocr: OcrSettings {
                base_url: ocr_base_url,
                api_key: ocr_api_key,
                languages: ocr_languages,
                timeout_seconds: ocr_timeout_seconds,
            },
            pdf: PdfSettings { rasterizer_bin, max_pages },
            upload: UploadSettings { max_upload_size_mb, allowed_extensions },
            store: StoreSettings { backend, exam_ttl_seconds },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub(crate) fn ocr(&self) -> &OcrSettings {
        &self.ocr
    }

    pub(crate) fn pdf(&self) -> &PdfSettings {
        &self.pdf
    }

    pub(crate) fn upload(&self) -> &UploadSettings {
        &self.upload
    }

    pub(crate) fn store_backend(&self) -> StoreBackend {
        self.store.backend
    }

    pub(crate) fn exam_ttl_seconds(&self) -> u64 {
        self.store.exam_ttl_seconds
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.allowed_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ALLOWED_EXTENSIONS",
                value: String::from("<empty>"),
            });
        }

        for extension in &self.upload.allowed_extensions {
            if !is_supported_extension(extension) {
                return Err(ConfigError::InvalidValue {
                    field: "ALLOWED_EXTENSIONS",
                    value: extension.clone(),
                });
            }
        }

        if self.upload.max_upload_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_UPLOAD_SIZE_MB",
                value: "0".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "LLM_TEMPERATURE",
                value: self.ai.temperature.to_string(),
            });
        }

        if self.ai.request_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "LLM_REQUEST_TIMEOUT",
                value: "0".to_string(),
            });
        }

        if self.ocr.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "OCR_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.pdf.max_pages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PDF_MAX_PAGES",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.ai.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("LLM_API_KEY"));
        }
        if self.ai.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("LLM_BASE_URL"));
        }
        if self.store.backend == StoreBackend::Redis && self.redis.host.is_empty() {
            return Err(ConfigError::MissingSecret("REDIS_HOST"));
        }

        Ok(())
    }
}
