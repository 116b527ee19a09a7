use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_IMAGES: u8 = 1;
pub const MAX_IMAGES: u8 = 4;

pub const PROMPT_TEMPLATES: [&str; 5] = [
  "A majestic lion wearing a crown, cinematic lighting, photorealistic",
  "A futuristic cityscape at night with flying cars, cyberpunk style, neon lights",
  "An enchanted forest with glowing mushrooms and mystical creatures, fantasy art",
  "A cute robot tending to a small garden on Mars, 3D model, detailed",
  "Portrait of a warrior queen, anime style, intricate armor, vibrant colors",
];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StylePreset {
  #[default]
  #[serde(rename = "photorealistic")]
  Photorealistic,
  #[serde(rename = "cinematic")]
  Cinematic,
  #[serde(rename = "anime")]
  Anime,
  #[serde(rename = "fantasy-art")]
  FantasyArt,
  #[serde(rename = "3d-model")]
  Model3d,
  #[serde(rename = "pixel-art")]
  PixelArt,
  #[serde(rename = "line-art")]
  LineArt,
  #[serde(rename = "low-poly")]
  LowPoly,
  #[serde(rename = "isometric")]
  Isometric,
  #[serde(rename = "cyberpunk")]
  Cyberpunk,
}

impl StylePreset {
  pub const ALL: [StylePreset; 10] = [
    StylePreset::Photorealistic,
    StylePreset::Cinematic,
    StylePreset::Anime,
    StylePreset::FantasyArt,
    StylePreset::Model3d,
    StylePreset::PixelArt,
    StylePreset::LineArt,
    StylePreset::LowPoly,
    StylePreset::Isometric,
    StylePreset::Cyberpunk,
  ];

  pub fn id(self) -> &'static str {
    match self {
      StylePreset::Photorealistic => "photorealistic",
      StylePreset::Cinematic => "cinematic",
      StylePreset::Anime => "anime",
      StylePreset::FantasyArt => "fantasy-art",
      StylePreset::Model3d => "3d-model",
      StylePreset::PixelArt => "pixel-art",
      StylePreset::LineArt => "line-art",
      StylePreset::LowPoly => "low-poly",
      StylePreset::Isometric => "isometric",
      StylePreset::Cyberpunk => "cyberpunk",
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      StylePreset::Photorealistic => "Photorealistic",
      StylePreset::Cinematic => "Cinematic",
      StylePreset::Anime => "Anime",
      StylePreset::FantasyArt => "Fantasy Art",
      StylePreset::Model3d => "3D Model",
      StylePreset::PixelArt => "Pixel Art",
      StylePreset::LineArt => "Line Art",
      StylePreset::LowPoly => "Low Poly",
      StylePreset::Isometric => "Isometric",
      StylePreset::Cyberpunk => "Cyberpunk",
    }
  }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AspectRatio {
  #[default]
  #[serde(rename = "1:1")]
  Square,
  #[serde(rename = "16:9")]
  Widescreen,
  #[serde(rename = "9:16")]
  Portrait,
  #[serde(rename = "4:3")]
  Landscape,
  #[serde(rename = "3:4")]
  Tall,
}

impl AspectRatio {
  pub const ALL: [AspectRatio; 5] = [
    AspectRatio::Square,
    AspectRatio::Widescreen,
    AspectRatio::Portrait,
    AspectRatio::Landscape,
    AspectRatio::Tall,
  ];

  pub fn token(self) -> &'static str {
    match self {
      AspectRatio::Square => "1:1",
      AspectRatio::Widescreen => "16:9",
      AspectRatio::Portrait => "9:16",
      AspectRatio::Landscape => "4:3",
      AspectRatio::Tall => "3:4",
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      AspectRatio::Square => "Square",
      AspectRatio::Widescreen => "Widescreen",
      AspectRatio::Portrait => "Portrait",
      AspectRatio::Landscape => "Landscape",
      AspectRatio::Tall => "Tall",
    }
  }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
  #[default]
  #[serde(rename = "image/jpeg")]
  Jpeg,
  #[serde(rename = "image/png")]
  Png,
}

impl OutputFormat {
  pub const ALL: [OutputFormat; 2] = [OutputFormat::Jpeg, OutputFormat::Png];

  pub fn mime(self) -> &'static str {
    match self {
      OutputFormat::Jpeg => "image/jpeg",
      OutputFormat::Png => "image/png",
    }
  }

  pub fn extension(self) -> &'static str {
    match self {
      OutputFormat::Jpeg => "jpg",
      OutputFormat::Png => "png",
    }
  }
}

/// Generation parameters. Used both as the editable draft and as the
/// snapshot stored with every generated image.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
  pub prompt: String,
  pub style_preset: StylePreset,
  pub aspect_ratio: AspectRatio,
  pub num_images: u8,
  pub output_format: OutputFormat,
}

impl Default for GenerationSettings {
  fn default() -> Self {
    Self {
      prompt: String::new(),
      style_preset: StylePreset::default(),
      aspect_ratio: AspectRatio::default(),
      num_images: MIN_IMAGES,
      output_format: OutputFormat::default(),
    }
  }
}

impl GenerationSettings {
  pub fn with_prompt(self, prompt: impl Into<String>) -> Self {
    Self {
      prompt: prompt.into(),
      ..self
    }
  }

  pub fn with_style_preset(self, style_preset: StylePreset) -> Self {
    Self { style_preset, ..self }
  }

  pub fn with_aspect_ratio(self, aspect_ratio: AspectRatio) -> Self {
    Self { aspect_ratio, ..self }
  }

  pub fn with_num_images(self, num_images: u8) -> Self {
    Self {
      num_images: num_images.clamp(MIN_IMAGES, MAX_IMAGES),
      ..self
    }
  }

  pub fn with_output_format(self, output_format: OutputFormat) -> Self {
    Self { output_format, ..self }
  }

  /// Clamps fields that arrive from outside into their valid ranges.
  pub fn normalized(self) -> Self {
    let num_images = self.num_images;
    self.with_num_images(num_images)
  }

  pub fn has_prompt(&self) -> bool {
    !self.prompt.trim().is_empty()
  }
}

/// Field-by-field edit of the draft coming from the control panel.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
  pub prompt: Option<String>,
  pub style_preset: Option<StylePreset>,
  pub aspect_ratio: Option<AspectRatio>,
  pub num_images: Option<u8>,
  pub output_format: Option<OutputFormat>,
}

impl SettingsPatch {
  pub fn apply(self, mut settings: GenerationSettings) -> GenerationSettings {
    if let Some(prompt) = self.prompt {
      settings = settings.with_prompt(prompt);
    }
    if let Some(style_preset) = self.style_preset {
      settings = settings.with_style_preset(style_preset);
    }
    if let Some(aspect_ratio) = self.aspect_ratio {
      settings = settings.with_aspect_ratio(aspect_ratio);
    }
    if let Some(num_images) = self.num_images {
      settings = settings.with_num_images(num_images);
    }
    if let Some(output_format) = self.output_format {
      settings = settings.with_output_format(output_format);
    }
    settings
  }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
  pub id: String,
  pub base64: String,
  pub prompt: String,
  pub settings: GenerationSettings,
  pub is_favorite: bool,
  pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
  pub fn new(base64: String, settings: &GenerationSettings, created_at: DateTime<Utc>) -> Self {
    Self {
      id: format!("img_{}", uuid::Uuid::new_v4().simple()),
      base64,
      prompt: settings.prompt.clone(),
      settings: settings.clone(),
      is_favorite: false,
      created_at,
    }
  }

  pub fn file_name(&self) -> String {
    format!("aetherlens_{}.{}", self.id, self.settings.output_format.extension())
  }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ViewTab {
  #[default]
  Generate,
  History,
  Favorites,
}

#[derive(Serialize)]
pub struct CatalogEntry {
  pub id: &'static str,
  pub name: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
  pub style_presets: Vec<CatalogEntry>,
  pub aspect_ratios: Vec<CatalogEntry>,
  pub output_formats: Vec<&'static str>,
  pub prompt_templates: Vec<&'static str>,
}

impl CatalogResponse {
  pub fn build() -> Self {
    Self {
      style_presets: StylePreset::ALL
        .iter()
        .map(|s| CatalogEntry {
          id: s.id(),
          name: s.label(),
        })
        .collect(),
      aspect_ratios: AspectRatio::ALL
        .iter()
        .map(|r| CatalogEntry {
          id: r.token(),
          name: r.label(),
        })
        .collect(),
      output_formats: OutputFormat::ALL.iter().map(|f| f.mime()).collect(),
      prompt_templates: PROMPT_TEMPLATES.to_vec(),
    }
  }
}

#[derive(Serialize, Deserialize)]
pub struct TabRequest {
  pub tab: ViewTab,
}

#[derive(Deserialize)]
pub struct ImagesQuery {
  pub tab: Option<ViewTab>,
}

#[derive(Deserialize)]
pub struct ApiKeyRequest {
  pub key: String,
}
