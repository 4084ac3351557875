mod agregador;
mod args;
mod campos;
mod cfop;
mod decoder;
mod error;
mod fontes;
mod formatacao;
mod metadata;
mod primitivos;
mod regex;
mod registros;
mod relatorio;
mod validador;

pub use self::{
    agregador::*, args::*, campos::*, cfop::*, decoder::*, error::*, fontes::*, formatacao::*,
    metadata::*, primitivos::*, regex::*, registros::*, relatorio::*, validador::*,
};
