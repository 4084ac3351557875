use std::{io, path::PathBuf};
use thiserror::Error;

use crate::TipoDeArquivo;

/// Tipo de retorno conveniente para todo o projeto
pub type SpedResult<T> = Result<T, SpedError>;

#[derive(Error, Debug)]
pub enum SpedError {
    #[error(
        "Erro no número de colunas!\n\
        Arquivo: {arquivo:?}\n\
        Linha nº: {linha}\n\
        Esperado: {esperado} colunas\n\
        Encontrado: {encontrado} colunas"
    )]
    ColumnCount {
        arquivo: PathBuf,
        linha: usize,
        esperado: usize,
        encontrado: usize,
    },

    #[error("Erro de configuração: {0}")]
    Config(String),

    #[error("Erro no processamento CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arquivo <{arquivo:?}> contém colunas repetidas: <{coluna}>")]
    DuplicateColumnName { arquivo: PathBuf, coluna: String },

    #[error("Arquivo <{arquivo:?}> contém colunas com nome em branco!")]
    EmptyColumnName { arquivo: PathBuf },

    #[error("CNPJ inválido: {cnpj}. Esperado 14 (CNPJ) ou 11 (CPF) dígitos, encontrado {length}")]
    InvalidCnpj { cnpj: String, length: usize },

    #[error("Valor decimal inválido em {campo}: <{valor}>")]
    InvalidDecimal { campo: String, valor: String },

    #[error("Período inválido: <{0}>. Formato esperado: AAAA-MM (ex.: 2024-01)")]
    InvalidPeriod(String),

    #[error("Período inicial {inicio} posterior ao período final {fim}")]
    InvertedPeriod { inicio: String, fim: String },

    #[error("Erro de I/O: {0}")]
    Io(#[from] io::Error),

    #[error(
        "Arquivo não encontrado!\n\
        Arquivo: {arquivo:?}\n\
        {source}"
    )]
    IoReader {
        #[source]
        source: io::Error,
        arquivo: PathBuf,
    },

    #[error("Erro na serialização JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Coluna essencial ausente no arquivo <{arquivo:?}>: {coluna} (Tipo: {tipo:?})")]
    MissingEssentialColumn {
        arquivo: PathBuf,
        coluna: String,
        tipo: TipoDeArquivo,
    },

    #[error(
        "Nenhum arquivo Sped EFD encontrado no diretório atual!\n\
        Informe os arquivos ou use nomes como 'SPED*.txt' ou 'EFD*.txt'."
    )]
    NoSpedFilesFound,
}

impl SpedError {
    /// Converte erros do `csv`, destacando a diferença no número de colunas.
    pub fn from_csv(e: csv::Error, arquivo: PathBuf, linha: usize) -> Self {
        if let csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } = e.kind()
        {
            return SpedError::ColumnCount {
                arquivo,
                linha,
                esperado: *expected_len as usize,
                encontrado: *len as usize,
            };
        }
        SpedError::Csv(e)
    }
}
