use std::fmt;
use std::io;
use std::str::FromStr;

/// Expectation mode of the E-step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmType {
    /// Hard counts from the single best parse of every sentence
    #[default]
    Viterbi,
    /// Expected counts from inside-outside marginals
    Em,
}

impl FromStr for EmType {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viterbi" => Ok(EmType::Viterbi),
            "em" => Ok(EmType::Em),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid em_type: {}", s),
            )),
        }
    }
}

impl fmt::Display for EmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmType::Viterbi => f.write_str("viterbi"),
            EmType::Em => f.write_str("em"),
        }
    }
}

/// Tags that can never head a dependency when the function mask is active
pub const FUNCTION_TAGS: [&str; 6] = ["ADP", "AUX", "CONJ", "DET", "PART", "SCONJ"];

/// DMV training options.
#[derive(Debug, Clone, PartialEq)]
pub struct DmvOptions {
    c_valency: usize,
    d_valency: usize,
    em_type: EmType,
    count_smoothing: f64,
    param_smoothing: f64,
    function_mask: bool,
    use_lex: bool,
    use_neural: bool,
    unified_network: bool,
    use_prior: bool,
    prior_alpha: f64,
    prior_epsilon: f64,
    lex_prior_alpha: f64,
    lex_epsilon: f64,
    specify_tags: Vec<String>,
    tag_num: usize,
    verbose: bool,
}

impl Default for DmvOptions {
    fn default() -> Self {
        Self {
            c_valency: 2,
            d_valency: 2,
            em_type: EmType::default(),
            count_smoothing: 0.1,
            param_smoothing: 0.1,
            function_mask: false,
            use_lex: false,
            use_neural: false,
            unified_network: false,
            use_prior: false,
            prior_alpha: 0.0,
            prior_epsilon: 1e-3,
            lex_prior_alpha: 0.0,
            lex_epsilon: 1e-3,
            specify_tags: Vec::new(),
            tag_num: 1,
            verbose: false,
        }
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> io::Result<T> {
    value.trim().parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid value for {}: {}", name, value),
        )
    })
}

fn parse_flag(name: &str, value: &str) -> io::Result<bool> {
    match value.trim() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid value for {}: {}", name, value),
        )),
    }
}

impl DmvOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn c_valency(&self) -> usize {
        self.c_valency
    }

    pub fn set_c_valency(&mut self, c_valency: usize) -> io::Result<()> {
        if !(1..=2).contains(&c_valency) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "c_valency must be 1 or 2",
            ));
        }
        self.c_valency = c_valency;
        Ok(())
    }

    pub fn d_valency(&self) -> usize {
        self.d_valency
    }

    pub fn set_d_valency(&mut self, d_valency: usize) -> io::Result<()> {
        if !(1..=2).contains(&d_valency) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "d_valency must be 1 or 2",
            ));
        }
        self.d_valency = d_valency;
        Ok(())
    }

    pub fn em_type(&self) -> EmType {
        self.em_type
    }

    pub fn set_em_type(&mut self, em_type: EmType) {
        self.em_type = em_type;
    }

    /// Additive smoothing of the harmonic initializer
    pub fn count_smoothing(&self) -> f64 {
        self.count_smoothing
    }

    pub fn set_count_smoothing(&mut self, count_smoothing: f64) -> io::Result<()> {
        if !(count_smoothing > 0.0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "count_smoothing must be positive",
            ));
        }
        self.count_smoothing = count_smoothing;
        Ok(())
    }

    /// Additive smoothing of the M-step
    pub fn param_smoothing(&self) -> f64 {
        self.param_smoothing
    }

    pub fn set_param_smoothing(&mut self, param_smoothing: f64) -> io::Result<()> {
        if !(param_smoothing >= 0.0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "param_smoothing must be non-negative",
            ));
        }
        self.param_smoothing = param_smoothing;
        Ok(())
    }

    pub fn function_mask(&self) -> bool {
        self.function_mask
    }

    pub fn set_function_mask(&mut self, enabled: bool) {
        self.function_mask = enabled;
    }

    pub fn use_lex(&self) -> bool {
        self.use_lex
    }

    pub fn set_use_lex(&mut self, enabled: bool) {
        self.use_lex = enabled;
    }

    pub fn use_neural(&self) -> bool {
        self.use_neural
    }

    pub fn set_use_neural(&mut self, enabled: bool) {
        self.use_neural = enabled;
    }

    /// Key decision samples by full tag id instead of decision id
    pub fn unified_network(&self) -> bool {
        self.unified_network
    }

    pub fn set_unified_network(&mut self, enabled: bool) {
        self.unified_network = enabled;
    }

    pub fn use_prior(&self) -> bool {
        self.use_prior
    }

    pub fn set_use_prior(&mut self, enabled: bool) {
        self.use_prior = enabled;
    }

    pub fn prior_alpha(&self) -> f64 {
        self.prior_alpha
    }

    pub fn set_prior_alpha(&mut self, prior_alpha: f64) -> io::Result<()> {
        if !(prior_alpha >= 0.0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "prior_alpha must be non-negative",
            ));
        }
        self.prior_alpha = prior_alpha;
        Ok(())
    }

    pub fn prior_epsilon(&self) -> f64 {
        self.prior_epsilon
    }

    pub fn set_prior_epsilon(&mut self, prior_epsilon: f64) -> io::Result<()> {
        if !(prior_epsilon > 0.0 && prior_epsilon < 1.0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "prior_epsilon must be within (0, 1)",
            ));
        }
        self.prior_epsilon = prior_epsilon;
        Ok(())
    }

    pub fn lex_prior_alpha(&self) -> f64 {
        self.lex_prior_alpha
    }

    pub fn set_lex_prior_alpha(&mut self, lex_prior_alpha: f64) -> io::Result<()> {
        if !(lex_prior_alpha >= 0.0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "lex_prior_alpha must be non-negative",
            ));
        }
        self.lex_prior_alpha = lex_prior_alpha;
        Ok(())
    }

    pub fn lex_epsilon(&self) -> f64 {
        self.lex_epsilon
    }

    pub fn set_lex_epsilon(&mut self, lex_epsilon: f64) -> io::Result<()> {
        if !(lex_epsilon > 0.0 && lex_epsilon < 1.0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "lex_epsilon must be within (0, 1)",
            ));
        }
        self.lex_epsilon = lex_epsilon;
        Ok(())
    }

    /// Restricted tag vocabulary of the specify-splitting mask
    pub fn specify_tags(&self) -> &[String] {
        &self.specify_tags
    }

    pub fn set_specify_tags<I, S>(&mut self, tags: I) -> io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut specify = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim();
            if tag.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "specify_tags must not contain empty tags",
                ));
            }
            if !specify.iter().any(|t: &String| t == tag) {
                specify.push(tag.to_string());
            }
        }
        self.specify_tags = specify;
        Ok(())
    }

    /// Latent sub-tags per observed tag
    pub fn tag_num(&self) -> usize {
        self.tag_num
    }

    pub fn set_tag_num(&mut self, tag_num: usize) -> io::Result<()> {
        if tag_num != 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tag_num must be 1, latent sub-tags are not supported",
            ));
        }
        self.tag_num = tag_num;
        Ok(())
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, enabled: bool) {
        self.verbose = enabled;
    }

    /// Set an option from its string representation
    pub fn set(&mut self, name: &str, value: &str) -> io::Result<()> {
        match name {
            "c_valency" => self.set_c_valency(parse_value(name, value)?),
            "d_valency" => self.set_d_valency(parse_value(name, value)?),
            "em_type" => {
                self.em_type = value.trim().parse()?;
                Ok(())
            }
            "count_smoothing" => self.set_count_smoothing(parse_value(name, value)?),
            "param_smoothing" => self.set_param_smoothing(parse_value(name, value)?),
            "function_mask" => {
                self.function_mask = parse_flag(name, value)?;
                Ok(())
            }
            "use_lex" => {
                self.use_lex = parse_flag(name, value)?;
                Ok(())
            }
            "use_neural" => {
                self.use_neural = parse_flag(name, value)?;
                Ok(())
            }
            "unified_network" => {
                self.unified_network = parse_flag(name, value)?;
                Ok(())
            }
            "use_prior" => {
                self.use_prior = parse_flag(name, value)?;
                Ok(())
            }
            "prior_alpha" => self.set_prior_alpha(parse_value(name, value)?),
            "prior_epsilon" => self.set_prior_epsilon(parse_value(name, value)?),
            "lex_prior_alpha" => self.set_lex_prior_alpha(parse_value(name, value)?),
            "lex_epsilon" => self.set_lex_epsilon(parse_value(name, value)?),
            "specify_tags" => {
                if value.trim().is_empty() {
                    self.specify_tags.clear();
                    Ok(())
                } else {
                    self.set_specify_tags(value.split(','))
                }
            }
            "tag_num" => self.set_tag_num(parse_value(name, value)?),
            "verbose" => {
                self.verbose = parse_flag(name, value)?;
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown option: {}", name),
            )),
        }
    }

    /// Get the string representation of an option
    pub fn get(&self, name: &str) -> io::Result<String> {
        let value = match name {
            "c_valency" => self.c_valency.to_string(),
            "d_valency" => self.d_valency.to_string(),
            "em_type" => self.em_type.to_string(),
            "count_smoothing" => self.count_smoothing.to_string(),
            "param_smoothing" => self.param_smoothing.to_string(),
            "function_mask" => self.function_mask.to_string(),
            "use_lex" => self.use_lex.to_string(),
            "use_neural" => self.use_neural.to_string(),
            "unified_network" => self.unified_network.to_string(),
            "use_prior" => self.use_prior.to_string(),
            "prior_alpha" => self.prior_alpha.to_string(),
            "prior_epsilon" => self.prior_epsilon.to_string(),
            "lex_prior_alpha" => self.lex_prior_alpha.to_string(),
            "lex_epsilon" => self.lex_epsilon.to_string(),
            "specify_tags" => self.specify_tags.join(","),
            "tag_num" => self.tag_num.to_string(),
            "verbose" => self.verbose.to_string(),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown option: {}", name),
                ))
            }
        };
        Ok(value)
    }
}
