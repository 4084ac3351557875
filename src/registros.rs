use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;
use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    fmt,
};

use crate::{Campos, RE_CHAVE_44, RE_NON_DIGITS, get_uf_do_municipio};

/// Indicador do tipo de operação do documento (campo IND_OPER).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub enum IndOper {
    /// `0`: entrada (aquisição).
    Entrada,
    /// `1`: saída (venda).
    Saida,
    /// Qualquer outro conteúdo, preservado como veio no arquivo.
    #[default]
    Desconhecido,
}

impl IndOper {
    pub fn from_campo(campo: &str) -> Self {
        match campo.trim() {
            "0" => IndOper::Entrada,
            "1" => IndOper::Saida,
            _ => IndOper::Desconhecido,
        }
    }

    pub fn codigo(&self) -> &'static str {
        match self {
            IndOper::Entrada => "0",
            IndOper::Saida => "1",
            IndOper::Desconhecido => "?",
        }
    }
}

impl fmt::Display for IndOper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nome = match self {
            IndOper::Entrada => "Entrada",
            IndOper::Saida => "Saída",
            IndOper::Desconhecido => "Desconhecido",
        };
        write!(f, "{nome} (ind_oper={})", self.codigo())
    }
}

/// Registro 0000: Abertura do Arquivo Digital e Identificação da Entidade.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Registro0000 {
    pub cod_ver: String,
    pub cod_fin: String,
    pub dt_ini: Option<NaiveDate>,
    pub dt_fin: Option<NaiveDate>,
    pub nome: String,
    pub cnpj: String,
    pub cpf: String,
    pub uf: String,
    pub ie: String,
    pub cod_mun: String,
    pub im: String,
    pub suframa: String,
    pub ind_perfil: String,
    pub ind_ativ: String,
}

impl Registro0000 {
    pub fn from_campos(c: &Campos) -> Self {
        Self {
            cod_ver: c.string(1),
            cod_fin: c.string(2),
            dt_ini: c.data(3),
            dt_fin: c.data(4),
            nome: c.string(5),
            cnpj: c.string(6),
            cpf: c.string(7),
            uf: c.string(8),
            ie: c.string(9),
            cod_mun: c.string(10),
            im: c.string(11),
            suframa: c.string(12),
            ind_perfil: c.string(13),
            ind_ativ: c.string(14),
        }
    }

    /// CNPJ (ou CPF, na falta dele) apenas com dígitos.
    pub fn documento_do_declarante(&self) -> String {
        let doc = if self.cnpj.trim().is_empty() {
            &self.cpf
        } else {
            &self.cnpj
        };
        so_digitos(doc).into_owned()
    }
}

/// Registro 0150: Tabela de Cadastro do Participante.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Registro0150 {
    pub cod_part: String,
    pub nome: String,
    pub cod_pais: String,
    pub cnpj: String,
    pub cpf: String,
    pub ie: String,
    pub cod_mun: String,
    pub suframa: String,
    pub end: String,
    pub num: String,
    pub compl: String,
    pub bairro: String,
}

impl Registro0150 {
    pub fn from_campos(c: &Campos) -> Self {
        Self {
            cod_part: c.string(1),
            nome: c.string(2),
            cod_pais: c.string(3),
            cnpj: so_digitos(c.texto(4)).into_owned(),
            cpf: so_digitos(c.texto(5)).into_owned(),
            ie: c.string(6),
            cod_mun: c.string(7),
            suframa: c.string(8),
            end: c.string(9),
            num: c.string(10),
            compl: c.string(11),
            bairro: c.string(12),
        }
    }

    /// UF derivada do código IBGE do município.
    pub fn uf(&self) -> Option<&'static str> {
        get_uf_do_municipio(&self.cod_mun)
    }

    /// CNPJ (14 dígitos) ou, na falta dele, CPF (11 dígitos).
    pub fn cnpj_cpf(&self) -> Option<&str> {
        [&self.cnpj, &self.cpf]
            .into_iter()
            .find(|doc| !doc.is_empty())
            .map(String::as_str)
    }

    /// Contribuinte do ICMS: possui inscrição estadual que não seja "ISENTO".
    pub fn is_contribuinte(&self) -> bool {
        let ie = self.ie.trim().to_uppercase();
        !ie.is_empty() && ie != "ISENTO" && ie != "ISENTA"
    }
}

/// Informações do participante obtidas fora do arquivo (consulta de CNPJ).
///
/// A consulta em si é responsabilidade de quem chama; aqui apenas o resultado.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Enriquecimento {
    pub uf: Option<String>,
    pub situacao_cadastral: String,
    pub optante_simples: Option<bool>,
    pub optante_mei: Option<bool>,
    pub data_consulta: Option<NaiveDateTime>,
    pub erro_consulta: String,
}

impl Enriquecimento {
    pub fn consultado(&self) -> bool {
        self.data_consulta.is_some() && self.erro_consulta.trim().is_empty()
    }
}

/// Regime tributário do participante, conforme os dados disponíveis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegimeTributario {
    Mei,
    SimplesNacional,
    LucroRealPresumido,
    NaoConsultado,
    PessoaFisica,
    NaoIdentificado,
}

impl RegimeTributario {
    pub fn classificar(participante: &Registro0150, info: Option<&Enriquecimento>) -> Self {
        let mei = info.and_then(|i| i.optante_mei) == Some(true);
        let simples = info.and_then(|i| i.optante_simples) == Some(true);

        if mei {
            RegimeTributario::Mei
        } else if simples {
            RegimeTributario::SimplesNacional
        } else if !participante.cnpj.is_empty() {
            match info {
                Some(i) if i.consultado() => RegimeTributario::LucroRealPresumido,
                _ => RegimeTributario::NaoConsultado,
            }
        } else if !participante.cpf.is_empty() {
            RegimeTributario::PessoaFisica
        } else {
            RegimeTributario::NaoIdentificado
        }
    }
}

impl fmt::Display for RegimeTributario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nome = match self {
            RegimeTributario::Mei => "MEI",
            RegimeTributario::SimplesNacional => "SIMPLES NACIONAL",
            RegimeTributario::LucroRealPresumido => "LUCRO REAL/PRESUMIDO",
            RegimeTributario::NaoConsultado => "NÃO CONSULTADO",
            RegimeTributario::PessoaFisica => "PESSOA FÍSICA",
            RegimeTributario::NaoIdentificado => "-",
        };
        write!(f, "{nome}")
    }
}

/// Registro 0200: Tabela de Identificação do Item (Produto e Serviços).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Registro0200 {
    pub cod_item: String,
    pub descr_item: String,
    pub cod_barra: String,
    pub cod_ant_item: String,
    pub unid_inv: String,
    pub tipo_item: String,
    pub cod_ncm: String,
    pub ex_ipi: String,
    pub cod_gen: String,
    pub cod_lst: String,
    pub aliq_icms: Decimal,
    pub cest: String,
}

impl Registro0200 {
    pub fn from_campos(c: &Campos) -> Self {
        Self {
            cod_item: c.string(1),
            descr_item: c.string(2),
            cod_barra: c.string(3),
            cod_ant_item: c.string(4),
            unid_inv: c.string(5),
            tipo_item: c.string(6),
            cod_ncm: c.string(7),
            ex_ipi: c.string(8),
            cod_gen: c.string(9),
            cod_lst: c.string(10),
            aliq_icms: c.decimal(11),
            cest: c.string(12),
        }
    }
}

/// Registro C100: Documento - Nota Fiscal (código 01), NF-e (código 55) e NFC-e (código 65).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistroC100 {
    /// Linha do arquivo em que o documento começa (1-based).
    pub linha: usize,
    pub ind_oper: IndOper,
    pub ind_emit: String,
    pub cod_part: String,
    pub cod_mod: String,
    pub cod_sit: String,
    pub ser: String,
    pub num_doc: String,
    pub chv_nfe: String,
    pub dt_doc: Option<NaiveDate>,
    pub dt_e_s: Option<NaiveDate>,
    pub vl_doc: Decimal,
    pub ind_pgto: String,
    pub vl_desc: Decimal,
    pub vl_abat_nt: Decimal,
    pub vl_merc: Decimal,
    pub ind_frt: String,
    pub vl_frt: Decimal,
    pub vl_seg: Decimal,
    pub vl_out_da: Decimal,
    pub vl_bc_icms: Decimal,
    pub vl_icms: Decimal,
    pub vl_bc_icms_st: Decimal,
    pub vl_icms_st: Decimal,
    pub vl_ipi: Decimal,
    pub vl_pis: Decimal,
    pub vl_cofins: Decimal,
    pub vl_pis_st: Decimal,
    pub vl_cofins_st: Decimal,

    pub itens: Vec<RegistroC170>,
    pub complementares: Vec<RegistroC110>,
    pub referencias: Vec<RegistroC113>,
    pub analiticos: Vec<RegistroC190>,
}

impl RegistroC100 {
    pub fn from_campos(c: &Campos, linha: usize) -> Self {
        Self {
            linha,
            ind_oper: IndOper::from_campo(c.texto(1)),
            ind_emit: c.string(2),
            cod_part: c.string(3),
            cod_mod: c.string(4),
            cod_sit: c.string(5),
            ser: c.string(6),
            num_doc: c.string(7),
            chv_nfe: c.string(8),
            dt_doc: c.data(9),
            dt_e_s: c.data(10),
            vl_doc: c.decimal(11),
            ind_pgto: c.string(12),
            vl_desc: c.decimal(13),
            vl_abat_nt: c.decimal(14),
            vl_merc: c.decimal(15),
            ind_frt: c.string(16),
            vl_frt: c.decimal(17),
            vl_seg: c.decimal(18),
            vl_out_da: c.decimal(19),
            vl_bc_icms: c.decimal(20),
            vl_icms: c.decimal(21),
            vl_bc_icms_st: c.decimal(22),
            vl_icms_st: c.decimal(23),
            vl_ipi: c.decimal(24),
            vl_pis: c.decimal(25),
            vl_cofins: c.decimal(26),
            vl_pis_st: c.decimal(27),
            vl_cofins_st: c.decimal(28),
            itens: Vec::new(),
            complementares: Vec::new(),
            referencias: Vec::new(),
            analiticos: Vec::new(),
        }
    }

    /// A chave de acesso tem exatamente 44 dígitos.
    pub fn chave_valida(&self) -> bool {
        RE_CHAVE_44.is_match(self.chv_nfe.trim())
    }
}

/// Registro C110: Informação Complementar da Nota Fiscal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistroC110 {
    pub cod_inf: String,
    pub txt_compl: String,
}

impl RegistroC110 {
    pub fn from_campos(c: &Campos) -> Self {
        Self {
            cod_inf: c.string(1),
            txt_compl: c.string(2),
        }
    }
}

/// Registro C113: Documento Fiscal Referenciado.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistroC113 {
    pub ind_oper: IndOper,
    pub ind_emit: String,
    pub cod_part: String,
    pub cod_mod: String,
    pub ser: String,
    pub sub: String,
    pub num_doc: String,
    pub dt_doc: Option<NaiveDate>,
    pub chv_doc: String,
}

impl RegistroC113 {
    pub fn from_campos(c: &Campos) -> Self {
        Self {
            ind_oper: IndOper::from_campo(c.texto(1)),
            ind_emit: c.string(2),
            cod_part: c.string(3),
            cod_mod: c.string(4),
            ser: c.string(5),
            sub: c.string(6),
            num_doc: c.string(7),
            dt_doc: c.data(8),
            chv_doc: c.string(9),
        }
    }
}

/// Registro C170: Itens do Documento.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistroC170 {
    pub num_item: String,
    pub cod_item: String,
    pub descr_compl: String,
    pub qtd: Decimal,
    pub unid: String,
    pub vl_item: Decimal,
    pub vl_desc: Decimal,
    pub ind_mov: String,
    pub cst_icms: String,
    pub cfop: String,
    pub cod_nat: String,
    pub vl_bc_icms: Decimal,
    pub aliq_icms: Decimal,
    pub vl_icms: Decimal,
    pub vl_bc_icms_st: Decimal,
    pub aliq_st: Decimal,
    pub vl_icms_st: Decimal,
    pub ind_apur: String,
    pub cst_ipi: String,
    pub cod_enq: String,
    pub vl_bc_ipi: Decimal,
    pub aliq_ipi: Decimal,
    pub vl_ipi: Decimal,
    pub cst_pis: String,
    pub vl_bc_pis: Decimal,
    pub aliq_pis: Decimal,
    pub quant_bc_pis: Decimal,
    pub aliq_pis_reais: Decimal,
    pub vl_pis: Decimal,
    pub cst_cofins: String,
    pub vl_bc_cofins: Decimal,
    pub aliq_cofins: Decimal,
    pub quant_bc_cofins: Decimal,
    pub aliq_cofins_reais: Decimal,
    pub vl_cofins: Decimal,
    pub cod_cta: String,
}

impl RegistroC170 {
    pub fn from_campos(c: &Campos) -> Self {
        Self {
            num_item: c.string(1),
            cod_item: c.string(2),
            descr_compl: c.string(3),
            qtd: c.decimal(4),
            unid: c.string(5),
            vl_item: c.decimal(6),
            vl_desc: c.decimal(7),
            ind_mov: c.string(8),
            cst_icms: c.string(9),
            cfop: c.string(10),
            cod_nat: c.string(11),
            vl_bc_icms: c.decimal(12),
            aliq_icms: c.decimal(13),
            vl_icms: c.decimal(14),
            vl_bc_icms_st: c.decimal(15),
            aliq_st: c.decimal(16),
            vl_icms_st: c.decimal(17),
            ind_apur: c.string(18),
            cst_ipi: c.string(19),
            cod_enq: c.string(20),
            vl_bc_ipi: c.decimal(21),
            aliq_ipi: c.decimal(22),
            vl_ipi: c.decimal(23),
            cst_pis: c.string(24),
            vl_bc_pis: c.decimal(25),
            aliq_pis: c.decimal(26),
            quant_bc_pis: c.decimal(27),
            aliq_pis_reais: c.decimal(28),
            vl_pis: c.decimal(29),
            cst_cofins: c.string(30),
            vl_bc_cofins: c.decimal(31),
            aliq_cofins: c.decimal(32),
            quant_bc_cofins: c.decimal(33),
            aliq_cofins_reais: c.decimal(34),
            vl_cofins: c.decimal(35),
            cod_cta: c.string(36),
        }
    }
}

/// Registro C190: Registro Analítico do Documento.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistroC190 {
    pub cst_icms: String,
    pub cfop: String,
    pub aliq_icms: Decimal,
    pub vl_opr: Decimal,
    pub vl_bc_icms: Decimal,
    pub vl_icms: Decimal,
    pub vl_bc_icms_st: Decimal,
    pub vl_icms_st: Decimal,
    pub vl_red_bc: Decimal,
    pub vl_ipi: Decimal,
    pub cod_obs: String,
}

impl RegistroC190 {
    pub fn from_campos(c: &Campos) -> Self {
        Self {
            cst_icms: c.string(1),
            cfop: c.string(2),
            aliq_icms: c.decimal(3),
            vl_opr: c.decimal(4),
            vl_bc_icms: c.decimal(5),
            vl_icms: c.decimal(6),
            vl_bc_icms_st: c.decimal(7),
            vl_icms_st: c.decimal(8),
            vl_red_bc: c.decimal(9),
            vl_ipi: c.decimal(10),
            cod_obs: c.string(11),
        }
    }
}

/// Registro E111: Ajuste/Benefício/Incentivo da Apuração do ICMS.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistroE111 {
    pub cod_aj_apur: String,
    pub descr_compl_aj: String,
    pub vl_aj_apur: Decimal,
}

impl RegistroE111 {
    pub fn from_campos(c: &Campos) -> Self {
        Self {
            cod_aj_apur: c.string(1),
            descr_compl_aj: c.string(2),
            vl_aj_apur: c.decimal(3),
        }
    }
}

/// Contadores produzidos durante a decodificação.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Estatisticas {
    /// Linhas não vazias lidas.
    pub linhas: usize,
    /// Quantidade de linhas por tipo de registro (inclusive os ignorados).
    pub por_registro: BTreeMap<String, usize>,
    /// Registros de tipo não tratado (ignorados).
    pub desconhecidos: usize,
    /// Registros filhos (C110, C113, C170, C190) sem um C100 anterior.
    pub orfaos: usize,
    /// Códigos de item (0200) ou de participante (0150) repetidos.
    pub duplicados: usize,
    /// Campos numéricos ou de data malformados, substituídos pelo padrão.
    pub campos_invalidos: usize,
    /// Quantidade de registros 0000 encontrados.
    pub aberturas: usize,
}

/// Resultado da decodificação de um arquivo Sped EFD ICMS/IPI.
///
/// Os registros são criados em uma única passagem e não são alterados depois.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArquivoSped {
    /// `None` quando o arquivo não possui registro 0000. Cabe a quem chama
    /// decidir se rejeita o arquivo.
    pub registro_0000: Option<Registro0000>,
    pub participantes: Vec<Registro0150>,
    pub itens: Vec<Registro0200>,
    pub documentos: Vec<RegistroC100>,
    pub ajustes: Vec<RegistroE111>,
    pub estatisticas: Estatisticas,
    /// Hash BLAKE3 (hexadecimal) do conteúdo original.
    pub impressao_digital: String,
}

impl ArquivoSped {
    pub fn is_empty(&self) -> bool {
        self.registro_0000.is_none()
            && self.participantes.is_empty()
            && self.itens.is_empty()
            && self.documentos.is_empty()
            && self.ajustes.is_empty()
    }

    /// Índice código do item -> registro 0200, para consultas repetidas.
    pub fn indice_itens(&self) -> HashMap<&str, &Registro0200> {
        self.itens
            .iter()
            .map(|item| (item.cod_item.as_str(), item))
            .collect()
    }

    /// Índice código do participante -> registro 0150.
    pub fn indice_participantes(&self) -> HashMap<&str, &Registro0150> {
        self.participantes
            .iter()
            .map(|p| (p.cod_part.as_str(), p))
            .collect()
    }

    /// Itens C170 de todos os documentos, na ordem do arquivo.
    pub fn itens_de_documentos(&self) -> impl Iterator<Item = (&RegistroC100, &RegistroC170)> {
        self.documentos
            .iter()
            .flat_map(|doc| doc.itens.iter().map(move |item| (doc, item)))
    }

    /// UF do declarante informada no registro 0000.
    pub fn uf_declarante(&self) -> Option<&str> {
        self.registro_0000
            .as_ref()
            .map(|r| r.uf.trim())
            .filter(|uf| !uf.is_empty())
    }
}

/// Mantém apenas os dígitos (CNPJ/CPF formatados com pontos, barras e traços).
pub fn so_digitos(texto: &str) -> Cow<'_, str> {
    RE_NON_DIGITS.replace_all(texto, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize;

    #[test]
    fn participante_com_cnpj_formatado() {
        let campos =
            tokenize("|0150|F001|Fornecedor Ltda|1058|12.345.678/0001-90||123456|3550308||Rua A|10||Centro|")
                .unwrap();
        let part = Registro0150::from_campos(&campos);
        assert_eq!(part.cnpj, "12345678000190");
        assert_eq!(part.cnpj_cpf(), Some("12345678000190"));
        assert_eq!(part.uf(), Some("SP"));
        assert!(part.is_contribuinte());
    }

    #[test]
    fn regime_tributario() {
        let pj = Registro0150 {
            cnpj: "12345678000190".into(),
            ..Default::default()
        };
        let pf = Registro0150 {
            cpf: "12345678901".into(),
            ..Default::default()
        };
        let consultado = Enriquecimento {
            data_consulta: chrono::NaiveDate::from_ymd_opt(2025, 1, 2)
                .and_then(|d| d.and_hms_opt(10, 0, 0)),
            ..Default::default()
        };
        let mei = Enriquecimento {
            optante_mei: Some(true),
            optante_simples: Some(true),
            ..Default::default()
        };

        assert_eq!(
            RegimeTributario::classificar(&pj, None),
            RegimeTributario::NaoConsultado
        );
        assert_eq!(
            RegimeTributario::classificar(&pj, Some(&consultado)),
            RegimeTributario::LucroRealPresumido
        );
        assert_eq!(
            RegimeTributario::classificar(&pj, Some(&mei)),
            RegimeTributario::Mei
        );
        assert_eq!(
            RegimeTributario::classificar(&pf, None),
            RegimeTributario::PessoaFisica
        );
        assert_eq!(
            RegimeTributario::classificar(&Registro0150::default(), None),
            RegimeTributario::NaoIdentificado
        );
    }

    #[test]
    fn chave_de_acesso() {
        let mut doc = RegistroC100::default();
        assert!(!doc.chave_valida());
        doc.chv_nfe = "3".repeat(44);
        assert!(doc.chave_valida());
        doc.chv_nfe = "3".repeat(43) + "X";
        assert!(!doc.chave_valida());
    }
}
